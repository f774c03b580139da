//! Node payloads as they appear on the wire, and their validated conversion
//! into the core data model.
//!
//! Quantities are `0x`-prefixed hex strings. A payload that is missing a
//! required field or carries an unparseable quantity converts into
//! [`StreamError::Malformed`].

use chainstream_core::{
    BlockNumber, BlockRef, BlockTransaction, LogEntry, StreamError, TransactionRef,
};
use serde::{Deserialize, Serialize};

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(field: &str, value: &str) -> Result<u64, StreamError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| StreamError::Malformed(format!("{field}: {value:?} is not 0x-prefixed")))?;
    if digits.is_empty() {
        return Err(StreamError::Malformed(format!("{field}: empty quantity")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| StreamError::Malformed(format!("{field}: {value:?}: {e}")))
}

/// Format a block number as a hex quantity.
pub fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

fn parse_u32(field: &str, value: &str) -> Result<u32, StreamError> {
    let n = parse_hex_u64(field, value)?;
    u32::try_from(n).map_err(|_| StreamError::Malformed(format!("{field}: {value} out of range")))
}

fn parse_opt<T>(
    field: &str,
    value: Option<&str>,
    parse: impl Fn(&str, &str) -> Result<T, StreamError>,
) -> Result<Option<T>, StreamError> {
    value.map(|v| parse(field, v)).transpose()
}

// ─── Transactions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_index: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub input: String,
}

impl TryFrom<RawTransaction> for TransactionRef {
    type Error = StreamError;

    fn try_from(raw: RawTransaction) -> Result<Self, StreamError> {
        Ok(TransactionRef {
            block_number: parse_opt("transaction.blockNumber", raw.block_number.as_deref(), parse_hex_u64)?,
            transaction_index: parse_opt(
                "transaction.transactionIndex",
                raw.transaction_index.as_deref(),
                parse_u32,
            )?,
            hash: raw.hash,
            block_hash: raw.block_hash,
            from: raw.from,
            // Contract deployments report an empty or null recipient.
            to: raw.to.filter(|t| !t.is_empty()),
            input: raw.input,
        })
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// One entry of a block's `transactions` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBlockTransaction {
    Hash(String),
    Full(RawTransaction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<RawBlockTransaction>,
}

impl TryFrom<RawBlock> for BlockRef {
    type Error = StreamError;

    fn try_from(raw: RawBlock) -> Result<Self, StreamError> {
        let number: BlockNumber = parse_hex_u64("block.number", &raw.number)?;
        let transactions = raw
            .transactions
            .into_iter()
            .map(|t| match t {
                RawBlockTransaction::Hash(h) => Ok(BlockTransaction::Hash(h)),
                RawBlockTransaction::Full(tx) => TransactionRef::try_from(tx).map(BlockTransaction::Full),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BlockRef {
            number,
            hash: raw.hash,
            parent_hash: raw.parent_hash,
            timestamp: parse_hex_u64("block.timestamp", &raw.timestamp)?,
            transactions,
        })
    }
}

// ─── Logs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub transaction_index: String,
    pub log_index: String,
}

impl TryFrom<RawLog> for LogEntry {
    type Error = StreamError;

    fn try_from(raw: RawLog) -> Result<Self, StreamError> {
        Ok(LogEntry {
            block_number: parse_hex_u64("log.blockNumber", &raw.block_number)?,
            transaction_index: parse_u32("log.transactionIndex", &raw.transaction_index)?,
            log_index: parse_u32("log.logIndex", &raw.log_index)?,
            address: raw.address,
            topics: raw.topics,
            data: raw.data,
            transaction_hash: raw.transaction_hash,
        })
    }
}
