//! Per-block log queries for `LogsMatching` subscriptions.

use crate::error::StreamError;
use crate::fetcher::BlockFetcher;
use crate::types::{BlockNumber, FilterCriteria, LogEntry};

/// Queries each newly discovered block for logs matching a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilterStream {
    criteria: FilterCriteria,
}

impl LogFilterStream {
    pub fn new(criteria: FilterCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Matching logs of block `number`, in the node's order.
    ///
    /// The filter is sent to the node and applied again locally, so a node
    /// that ignores part of the filter cannot leak non-matching logs.
    pub async fn logs_for_block(
        &self,
        fetcher: &BlockFetcher,
        number: BlockNumber,
    ) -> Result<Vec<LogEntry>, StreamError> {
        let logs = fetcher.logs(&self.criteria, number..=number).await?;
        Ok(self.select(logs))
    }

    /// Keep the logs accepted by the criteria, preserving order.
    pub fn select(&self, logs: Vec<LogEntry>) -> Vec<LogEntry> {
        logs.into_iter().filter(|l| self.criteria.matches(l)).collect()
    }
}
