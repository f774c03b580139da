//! [`ChainClient`] over JSON-RPC for group-based nodes.
//!
//! Every call carries the node group id as its first parameter.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chainstream_core::{
    BlockNumber, BlockRef, ChainClient, FilterCriteria, LogEntry, StreamError, TransactionRef,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::request::JsonRpcRequest;
use crate::transport::RpcTransport;
use crate::wire::{parse_hex_u64, to_hex, RawBlock, RawLog, RawTransaction};

/// Node methods used by the streams.
pub mod methods {
    pub const BLOCK_NUMBER: &str = "getBlockNumber";
    pub const BLOCK_BY_NUMBER: &str = "getBlockByNumber";
    pub const BLOCK_BY_HASH: &str = "getBlockByHash";
    pub const TRANSACTION_BY_HASH: &str = "getTransactionByHash";
    pub const PENDING_TRANSACTIONS: &str = "getPendingTransactions";
    pub const LOGS: &str = "getLogs";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcClientConfig {
    /// Group addressed by every call.
    #[serde(default = "default_group_id")]
    pub group_id: u32,
}

fn default_group_id() -> u32 {
    1
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
        }
    }
}

/// Remote call surface over any [`RpcTransport`].
pub struct JsonRpcChainClient<T> {
    transport: T,
    config: RpcClientConfig,
    next_id: AtomicU64,
}

impl<T: RpcTransport> JsonRpcChainClient<T> {
    /// A client for the default group.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, RpcClientConfig::default())
    }

    pub fn with_config(transport: T, config: RpcClientConfig) -> Self {
        Self {
            transport,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn group_id(&self) -> u32 {
        self.config.group_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `method` to the group and deserialize the result.
    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, StreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::for_group(id, method, self.config.group_id, params);
        debug!(method, id, group = self.config.group_id, url = self.transport.url(), "rpc call");

        self.exchange(req).await.map_err(|e| {
            warn!(method, id, error = %e, "rpc call failed");
            StreamError::from(e)
        })
    }

    async fn exchange<R: DeserializeOwned>(&self, req: JsonRpcRequest) -> Result<R, TransportError> {
        let expected = req.id.clone();
        let resp = self.transport.send(req).await?;
        if resp.id != expected {
            return Err(TransportError::InvalidResponse(format!(
                "response id {} does not match request id {expected}",
                resp.id
            )));
        }
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        Ok(serde_json::from_value(result)?)
    }
}

/// The `getLogs` filter object. Empty address and topic lists are left out.
fn log_filter(filter: &FilterCriteria, range: &RangeInclusive<BlockNumber>) -> Value {
    let mut obj = Map::new();
    obj.insert("fromBlock".into(), json!(to_hex(*range.start())));
    obj.insert("toBlock".into(), json!(to_hex(*range.end())));
    if !filter.addresses.is_empty() {
        obj.insert("address".into(), json!(filter.addresses));
    }
    if !filter.topics.is_empty() {
        obj.insert("topics".into(), json!(filter.topics));
    }
    Value::Object(obj)
}

#[async_trait]
impl<T: RpcTransport> ChainClient for JsonRpcChainClient<T> {
    async fn get_latest_block_number(&self) -> Result<BlockNumber, StreamError> {
        let hex: String = self.call(methods::BLOCK_NUMBER, vec![]).await?;
        parse_hex_u64("blockNumber", &hex)
    }

    async fn get_block_by_number(
        &self,
        number: BlockNumber,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError> {
        let raw: Option<RawBlock> = self
            .call(methods::BLOCK_BY_NUMBER, vec![json!(to_hex(number)), json!(full_transactions)])
            .await?;
        raw.map(BlockRef::try_from).transpose()
    }

    async fn get_block_by_hash(
        &self,
        hash: &str,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError> {
        let raw: Option<RawBlock> = self
            .call(methods::BLOCK_BY_HASH, vec![json!(hash), json!(full_transactions)])
            .await?;
        raw.map(BlockRef::try_from).transpose()
    }

    async fn get_logs(
        &self,
        filter: &FilterCriteria,
        range: RangeInclusive<BlockNumber>,
    ) -> Result<Vec<LogEntry>, StreamError> {
        let raw: Vec<RawLog> = self
            .call(methods::LOGS, vec![log_filter(filter, &range)])
            .await?;
        raw.into_iter().map(LogEntry::try_from).collect()
    }

    async fn get_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRef>, StreamError> {
        let raw: Option<RawTransaction> = self
            .call(methods::TRANSACTION_BY_HASH, vec![json!(hash)])
            .await?;
        raw.map(TransactionRef::try_from).transpose()
    }

    async fn get_pending_transactions(&self) -> Result<Vec<TransactionRef>, StreamError> {
        let raw: Vec<RawTransaction> = self.call(methods::PENDING_TRANSACTIONS, vec![]).await?;
        raw.into_iter().map(TransactionRef::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JsonRpcResponse, RpcId};
    use chainstream_core::TopicMatcher;

    #[test]
    fn filter_object_omits_empty_parts() {
        let value = log_filter(&FilterCriteria::default(), &(16..=16));
        assert_eq!(value, json!({ "fromBlock": "0x10", "toBlock": "0x10" }));
    }

    #[test]
    fn filter_object_encodes_topic_matchers() {
        let filter = FilterCriteria::address("0xc0ffee")
            .any_topic()
            .topic("0xabc")
            .topic(TopicMatcher::OneOf(vec!["0x1".into(), "0x2".into()]));
        let value = log_filter(&filter, &(1..=2));
        assert_eq!(value["address"], json!(["0xc0ffee"]));
        assert_eq!(value["topics"], json!([null, "0xabc", ["0x1", "0x2"]]));
    }

    /// Answers every request with `result`, under `id` when set.
    struct Canned {
        result: Value,
        id: Option<RpcId>,
    }

    #[async_trait]
    impl RpcTransport for Canned {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let id = self.id.clone().unwrap_or(req.id);
            Ok(JsonRpcResponse::success(id, self.result.clone()))
        }

        fn url(&self) -> &str {
            "canned://"
        }
    }

    #[tokio::test]
    async fn mismatched_response_id_is_rejected() {
        let client = JsonRpcChainClient::new(Canned {
            result: json!("0x10"),
            id: Some(RpcId::Number(999)),
        });
        let err = client.get_latest_block_number().await.unwrap_err();
        assert!(matches!(err, StreamError::Malformed(ref m) if m.contains("999")));
    }

    #[tokio::test]
    async fn undecodable_result_is_malformed() {
        let client = JsonRpcChainClient::new(Canned {
            result: json!({ "unexpected": true }),
            id: None,
        });
        let err = client.get_pending_transactions().await.unwrap_err();
        assert!(matches!(err, StreamError::Malformed(ref m) if m.starts_with("deserialization error")));
    }

    #[test]
    fn default_group() {
        let config: RpcClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.group_id, 1);
    }
}
