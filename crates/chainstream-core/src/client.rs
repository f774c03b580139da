//! The remote call surface the streams are built on.

use std::ops::RangeInclusive;

use async_trait::async_trait;

use crate::error::StreamError;
use crate::types::{BlockNumber, BlockRef, FilterCriteria, LogEntry, TransactionRef};

/// Read-only node calls used by the stream walkers.
///
/// Implementations report transport failures and timeouts as
/// [`StreamError::Transient`] and unparseable payloads as
/// [`StreamError::Malformed`]. "Not found" is `Ok(None)`.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Current tip of the chain.
    async fn get_latest_block_number(&self) -> Result<BlockNumber, StreamError>;

    async fn get_block_by_number(
        &self,
        number: BlockNumber,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError>;

    async fn get_block_by_hash(
        &self,
        hash: &str,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError>;

    /// Logs in `range` matching `filter`, ordered by transaction index then log index.
    async fn get_logs(
        &self,
        filter: &FilterCriteria,
        range: RangeInclusive<BlockNumber>,
    ) -> Result<Vec<LogEntry>, StreamError>;

    async fn get_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRef>, StreamError>;

    /// Transactions currently waiting in the node's pending pool, in pool order.
    async fn get_pending_transactions(&self) -> Result<Vec<TransactionRef>, StreamError>;
}
