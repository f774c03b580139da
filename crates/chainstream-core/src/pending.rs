//! Pending-pool feeds.
//!
//! The pool has no block numbers to track, so progress is a set of hashes
//! already delivered. The set is pruned to the current pool after every
//! tick: a transaction that leaves the pool is forgotten, and is delivered
//! again only if it reappears.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StreamError;
use crate::fetcher::BlockFetcher;
use crate::scheduler::{PollTask, TickOutcome};
use crate::sink::ItemSink;
use crate::types::StreamItem;

pub struct PendingPoolWalker {
    fetcher: BlockFetcher,
    sink: ItemSink,
    hashes_only: bool,
    seen: HashSet<String>,
}

impl PendingPoolWalker {
    pub fn new(fetcher: BlockFetcher, sink: ItemSink, hashes_only: bool) -> Self {
        Self {
            fetcher,
            sink,
            hashes_only,
            seen: HashSet::new(),
        }
    }

    /// Number of pool entries currently remembered as delivered.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub async fn step(&mut self) -> Result<TickOutcome, StreamError> {
        self.sink.ensure_open()?;
        let pool = self.fetcher.pending_transactions().await?;
        self.sink.ensure_open()?;

        let mut emitted = 0usize;
        for tx in &pool {
            if self.seen.contains(&tx.hash) {
                continue;
            }
            let item = if self.hashes_only {
                StreamItem::TransactionHash(tx.hash.clone())
            } else {
                StreamItem::Transaction(tx.clone())
            };
            self.sink.send(item).await?;
            self.seen.insert(tx.hash.clone());
            emitted += 1;
        }

        let current: HashSet<&str> = pool.iter().map(|tx| tx.hash.as_str()).collect();
        self.seen.retain(|h| current.contains(h.as_str()));

        if emitted == 0 {
            return Ok(TickOutcome::Idle);
        }
        debug!(emitted, pool = pool.len(), "pending transactions delivered");
        Ok(TickOutcome::Progressed)
    }
}

#[async_trait]
impl PollTask for PendingPoolWalker {
    fn name(&self) -> &str {
        if self.hashes_only {
            "pending-transaction-hashes"
        } else {
            "pending-transactions"
        }
    }

    async fn tick(&mut self) -> Result<TickOutcome, StreamError> {
        self.step().await
    }
}
