//! Block, log and transaction retrieval.
//!
//! Wraps a [`ChainClient`], bounds the number of concurrently in-flight remote
//! calls across every subscription that shares the fetcher, and validates the
//! fields the walkers derive their position from. There is no retry here: a
//! failed call is returned to the walker and the next scheduler tick retries.

use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::client::ChainClient;
use crate::error::StreamError;
use crate::tip_cache::TipCache;
use crate::types::{BlockNumber, BlockRef, FilterCriteria, LogEntry, TransactionRef};

/// Shared, cheaply cloneable front for the remote call surface.
#[derive(Clone)]
pub struct BlockFetcher {
    client: Arc<dyn ChainClient>,
    permits: Arc<Semaphore>,
    tip_cache: Option<Arc<TipCache>>,
}

impl BlockFetcher {
    /// Create a fetcher allowing at most `max_in_flight` concurrent remote calls.
    pub fn new(client: Arc<dyn ChainClient>, max_in_flight: usize) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tip_cache: None,
        }
    }

    /// Feed every observed tip into `cache`.
    pub fn with_tip_cache(mut self, cache: Arc<TipCache>) -> Self {
        self.tip_cache = Some(cache);
        self
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// Fetch the current chain tip.
    pub async fn tip(&self) -> Result<BlockNumber, StreamError> {
        let tip = {
            let _permit = self.permit().await?;
            self.client.get_latest_block_number().await?
        };
        if let Some(cache) = &self.tip_cache {
            cache.observe(tip);
        }
        Ok(tip)
    }

    /// Fetch a block by number. `Ok(None)` if the node does not have it.
    pub async fn block(
        &self,
        number: BlockNumber,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError> {
        let block = {
            let _permit = self.permit().await?;
            self.client.get_block_by_number(number, full_transactions).await?
        };
        match block {
            Some(block) => {
                validate_block(&block)?;
                if block.number != number {
                    return Err(StreamError::Malformed(format!(
                        "requested block {number}, node returned block {}",
                        block.number
                    )));
                }
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Fetch a block by hash. `Ok(None)` if the node does not have it.
    pub async fn block_by_hash(
        &self,
        hash: &str,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError> {
        let block = {
            let _permit = self.permit().await?;
            self.client.get_block_by_hash(hash, full_transactions).await?
        };
        match block {
            Some(block) => {
                validate_block(&block)?;
                if !block.hash.eq_ignore_ascii_case(hash) {
                    return Err(StreamError::Malformed(format!(
                        "requested block {hash}, node returned block {}",
                        block.hash
                    )));
                }
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Fetch logs matching `filter` in `range`, in the node's order.
    pub async fn logs(
        &self,
        filter: &FilterCriteria,
        range: RangeInclusive<BlockNumber>,
    ) -> Result<Vec<LogEntry>, StreamError> {
        if range.is_empty() {
            return Ok(vec![]);
        }
        let logs = {
            let _permit = self.permit().await?;
            self.client.get_logs(filter, range.clone()).await?
        };
        if let Some(stray) = logs.iter().find(|l| !range.contains(&l.block_number)) {
            return Err(StreamError::Malformed(format!(
                "log from block {} outside requested range {}..={}",
                stray.block_number,
                range.start(),
                range.end()
            )));
        }
        Ok(logs)
    }

    /// Fetch a transaction by hash. `Ok(None)` if the node does not know it.
    pub async fn transaction(&self, hash: &str) -> Result<Option<TransactionRef>, StreamError> {
        let tx = {
            let _permit = self.permit().await?;
            self.client.get_transaction_by_hash(hash).await?
        };
        if let Some(tx) = &tx {
            if tx.hash.is_empty() {
                return Err(StreamError::Malformed(format!("transaction {hash} without hash")));
            }
        }
        Ok(tx)
    }

    /// Fetch the node's pending pool.
    pub async fn pending_transactions(&self) -> Result<Vec<TransactionRef>, StreamError> {
        let pool = {
            let _permit = self.permit().await?;
            self.client.get_pending_transactions().await?
        };
        if pool.iter().any(|tx| tx.hash.is_empty()) {
            return Err(StreamError::Malformed("pending transaction without hash".into()));
        }
        Ok(pool)
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, StreamError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| StreamError::Internal("request limiter closed".into()))
    }
}

fn validate_block(block: &BlockRef) -> Result<(), StreamError> {
    if block.hash.is_empty() {
        return Err(StreamError::Malformed(format!("block {} without hash", block.number)));
    }
    if let Some(i) = block.transactions.iter().position(|t| t.hash().is_empty()) {
        return Err(StreamError::Malformed(format!(
            "block {} transaction {i} without hash",
            block.number
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChain;
    use crate::tip_cache::ObservedOnly;
    use crate::types::BlockTransaction;

    fn fetcher(chain: &Arc<InMemoryChain>) -> BlockFetcher {
        BlockFetcher::new(chain.clone(), 4)
    }

    #[tokio::test]
    async fn fetches_block_with_requested_detail() {
        let chain = Arc::new(InMemoryChain::with_tip(5, 2));
        let f = fetcher(&chain);

        let full = f.block(3, true).await.unwrap().unwrap();
        assert_eq!(full.number, 3);
        assert!(matches!(full.transactions[0], BlockTransaction::Full(_)));

        let hashes = f.block(3, false).await.unwrap().unwrap();
        assert!(matches!(hashes.transactions[0], BlockTransaction::Hash(_)));
    }

    #[tokio::test]
    async fn missing_block_is_none() {
        let chain = Arc::new(InMemoryChain::with_tip(5, 0));
        assert!(fetcher(&chain).block(9, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_block_number_is_malformed() {
        let chain = Arc::new(InMemoryChain::with_tip(5, 0));
        chain.corrupt_block(4);
        let err = fetcher(&chain).block(4, false).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn failure_is_reported_not_retried() {
        let chain = Arc::new(InMemoryChain::with_tip(5, 0));
        chain.fail_block(2, 1);
        let f = fetcher(&chain);
        assert!(f.block(2, false).await.unwrap_err().is_transient());
        assert!(f.block(2, false).await.unwrap().is_some());
        assert_eq!(chain.block_requests(), vec![2, 2]);
    }

    #[tokio::test]
    async fn block_by_hash_round_trip() {
        let chain = Arc::new(InMemoryChain::with_tip(5, 1));
        let f = fetcher(&chain);
        let by_number = f.block(4, true).await.unwrap().unwrap();
        let by_hash = f.block_by_hash(&by_number.hash, true).await.unwrap().unwrap();
        assert_eq!(by_number, by_hash);
        assert!(f.block_by_hash("0xdead", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transaction_lookup() {
        let chain = Arc::new(InMemoryChain::with_tip(3, 2));
        let f = fetcher(&chain);
        let block = f.block(2, false).await.unwrap().unwrap();
        let tx = f.transaction(block.transactions[1].hash()).await.unwrap().unwrap();
        assert_eq!(tx.block_number, Some(2));
        assert_eq!(tx.transaction_index, Some(1));
    }

    #[tokio::test]
    async fn tip_feeds_cache() {
        let chain = Arc::new(InMemoryChain::with_tip(12, 0));
        let cache = Arc::new(TipCache::new(chain.clone(), 500, ObservedOnly));
        let f = fetcher(&chain).with_tip_cache(cache.clone());
        assert_eq!(f.tip().await.unwrap(), 12);
        assert_eq!(cache.cached_tip(), Some(12));
    }
}
