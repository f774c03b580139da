//! In-memory chain.
//!
//! A deterministic [`ChainClient`] for tests and local simulation. Blocks are
//! generated on demand from their number; the tip only moves when told to.
//! Failures, missing blocks and bad payloads can be injected per call.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::client::ChainClient;
use crate::error::StreamError;
use crate::types::{
    BlockNumber, BlockRef, BlockTransaction, FilterCriteria, LogEntry, TransactionRef,
};

const GENESIS_TIMESTAMP_MS: u64 = 1_600_000_000_000;
const BLOCK_TIME_MS: u64 = 1_000;

#[derive(Default)]
struct ChainState {
    tip: BlockNumber,
    txs_per_block: u32,
    logs: Vec<LogEntry>,
    pending: Vec<TransactionRef>,
    fail_next: usize,
    failing_blocks: HashMap<BlockNumber, usize>,
    hidden: HashSet<BlockNumber>,
    corrupt: HashSet<BlockNumber>,
    reported_tip: Option<BlockNumber>,
    mine_on_tip_request: Option<(usize, u64)>,
    mine_on_block_request: HashMap<BlockNumber, u64>,
    block_requests: Vec<BlockNumber>,
    tip_requests: usize,
}

/// Deterministic chain held in memory.
#[derive(Default)]
pub struct InMemoryChain {
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    /// A chain holding only the genesis block, without transactions.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain with blocks `0..=tip`, each carrying `txs_per_block` transactions.
    pub fn with_tip(tip: BlockNumber, txs_per_block: u32) -> Self {
        let chain = Self::default();
        {
            let mut s = chain.state();
            s.tip = tip;
            s.txs_per_block = txs_per_block;
        }
        chain
    }

    /// Produce `count` new blocks and return the new tip.
    pub fn mine(&self, count: u64) -> BlockNumber {
        let mut s = self.state();
        s.tip += count;
        s.tip
    }

    pub fn tip(&self) -> BlockNumber {
        self.state().tip
    }

    /// Hash of block `number`.
    pub fn block_hash(number: BlockNumber) -> String {
        format!("0x{number:064x}")
    }

    /// Hash of transaction `index` of block `number`.
    pub fn transaction_hash(number: BlockNumber, index: u32) -> String {
        format!("0x{number:032x}{index:032x}")
    }

    /// Store a log. Logs are served ordered by block, transaction index and log index.
    pub fn add_log(&self, log: LogEntry) {
        let mut s = self.state();
        s.logs.push(log);
        s.logs
            .sort_by_key(|l| (l.block_number, l.transaction_index, l.log_index));
    }

    /// Replace the pending pool with transactions of the given hashes.
    pub fn set_pending(&self, hashes: &[&str]) {
        self.state().pending = hashes.iter().map(|h| pending_transaction(h)).collect();
    }

    /// Append one transaction to the pending pool.
    pub fn push_pending(&self, hash: &str) {
        self.state().pending.push(pending_transaction(hash));
    }

    /// Make the next `count` calls of any kind fail.
    pub fn fail_next_calls(&self, count: usize) {
        self.state().fail_next = count;
    }

    /// Make the next `times` fetches of block `number` fail.
    pub fn fail_block(&self, number: BlockNumber, times: usize) {
        self.state().failing_blocks.insert(number, times);
    }

    /// Answer "not found" for block `number` even when it is below the tip.
    pub fn hide_block(&self, number: BlockNumber) {
        self.state().hidden.insert(number);
    }

    /// Serve block `number` with a wrong block number.
    pub fn corrupt_block(&self, number: BlockNumber) {
        self.state().corrupt.insert(number);
    }

    /// Report `tip` from `get_latest_block_number` instead of the real tip. `None` restores it.
    pub fn report_tip(&self, tip: Option<BlockNumber>) {
        self.state().reported_tip = tip;
    }

    /// Mine `count` blocks right before answering the `nth` tip request (1-based).
    pub fn mine_on_tip_request(&self, nth: usize, count: u64) {
        self.state().mine_on_tip_request = Some((nth, count));
    }

    /// Mine `count` blocks the first time block `number` is requested.
    pub fn mine_on_block_request(&self, number: BlockNumber, count: u64) {
        self.state().mine_on_block_request.insert(number, count);
    }

    /// Every block number requested so far, in request order.
    pub fn block_requests(&self) -> Vec<BlockNumber> {
        self.state().block_requests.clone()
    }

    /// Number of tip requests served so far.
    pub fn tip_requests(&self) -> usize {
        self.state().tip_requests
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn injected_failure(s: &mut ChainState, call: &str) -> Result<(), StreamError> {
        if s.fail_next > 0 {
            s.fail_next -= 1;
            return Err(StreamError::Transient(format!("{call}: injected failure")));
        }
        Ok(())
    }
}

fn pending_transaction(hash: &str) -> TransactionRef {
    TransactionRef {
        hash: hash.to_string(),
        block_number: None,
        block_hash: None,
        transaction_index: None,
        from: "0x00000000000000000000000000000000000000aa".into(),
        to: Some("0x00000000000000000000000000000000000000bb".into()),
        input: "0x".into(),
    }
}

fn transaction(number: BlockNumber, index: u32) -> TransactionRef {
    TransactionRef {
        hash: InMemoryChain::transaction_hash(number, index),
        block_number: Some(number),
        block_hash: Some(InMemoryChain::block_hash(number)),
        transaction_index: Some(index),
        from: format!("0x{:040x}", u64::from(index) + 1),
        to: Some(format!("0x{number:040x}")),
        input: "0x".into(),
    }
}

fn block(s: &ChainState, number: BlockNumber, full: bool) -> BlockRef {
    let transactions = (0..s.txs_per_block)
        .map(|i| {
            if full {
                BlockTransaction::Full(transaction(number, i))
            } else {
                BlockTransaction::Hash(InMemoryChain::transaction_hash(number, i))
            }
        })
        .collect();
    BlockRef {
        number: if s.corrupt.contains(&number) { number + 1 } else { number },
        hash: InMemoryChain::block_hash(number),
        parent_hash: InMemoryChain::block_hash(number.saturating_sub(1)),
        timestamp: GENESIS_TIMESTAMP_MS + number * BLOCK_TIME_MS,
        transactions,
    }
}

fn parse_hex(hex: &str) -> Option<u128> {
    let digits = hex.strip_prefix("0x")?;
    if digits.len() > 64 || !digits.is_ascii() {
        return None;
    }
    // Only the low half matters for the hashes this chain hands out.
    let low = &digits[digits.len().saturating_sub(32)..];
    let high = &digits[..digits.len().saturating_sub(32)];
    if !high.is_empty() && u128::from_str_radix(high, 16).ok()? != 0 {
        return None;
    }
    u128::from_str_radix(low, 16).ok()
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn get_latest_block_number(&self) -> Result<BlockNumber, StreamError> {
        let mut s = self.state();
        s.tip_requests += 1;
        Self::injected_failure(&mut s, "getBlockNumber")?;
        if let Some((nth, count)) = s.mine_on_tip_request {
            if s.tip_requests == nth {
                s.tip += count;
                s.mine_on_tip_request = None;
            }
        }
        Ok(s.reported_tip.unwrap_or(s.tip))
    }

    async fn get_block_by_number(
        &self,
        number: BlockNumber,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError> {
        let mut s = self.state();
        s.block_requests.push(number);
        Self::injected_failure(&mut s, "getBlockByNumber")?;
        if let Some(left) = s.failing_blocks.get_mut(&number) {
            if *left > 0 {
                *left -= 1;
                return Err(StreamError::Transient(format!("block {number}: injected failure")));
            }
        }
        if let Some(count) = s.mine_on_block_request.remove(&number) {
            s.tip += count;
        }
        if number > s.tip || s.hidden.contains(&number) {
            return Ok(None);
        }
        Ok(Some(block(&s, number, full_transactions)))
    }

    async fn get_block_by_hash(
        &self,
        hash: &str,
        full_transactions: bool,
    ) -> Result<Option<BlockRef>, StreamError> {
        let mut s = self.state();
        Self::injected_failure(&mut s, "getBlockByHash")?;
        let number = parse_hex(hash).and_then(|n| BlockNumber::try_from(n).ok());
        match number {
            Some(n) if n <= s.tip && !s.hidden.contains(&n) && Self::block_hash(n) == hash => {
                Ok(Some(block(&s, n, full_transactions)))
            }
            _ => Ok(None),
        }
    }

    async fn get_logs(
        &self,
        filter: &FilterCriteria,
        range: RangeInclusive<BlockNumber>,
    ) -> Result<Vec<LogEntry>, StreamError> {
        let mut s = self.state();
        Self::injected_failure(&mut s, "getLogs")?;
        Ok(s.logs
            .iter()
            .filter(|l| range.contains(&l.block_number) && filter.matches(l))
            .cloned()
            .collect())
    }

    async fn get_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRef>, StreamError> {
        let mut s = self.state();
        Self::injected_failure(&mut s, "getTransactionByHash")?;
        if let Some(tx) = s.pending.iter().find(|t| t.hash == hash) {
            return Ok(Some(tx.clone()));
        }
        let Some(digits) = hash.strip_prefix("0x").filter(|d| d.len() == 64 && d.is_ascii()) else {
            return Ok(None);
        };
        let number = u64::from_str_radix(&digits[..32], 16).ok();
        let index = u32::from_str_radix(&digits[32..], 16).ok();
        match (number, index) {
            (Some(n), Some(i)) if n <= s.tip && i < s.txs_per_block && !s.hidden.contains(&n) => {
                Ok(Some(transaction(n, i)))
            }
            _ => Ok(None),
        }
    }

    async fn get_pending_transactions(&self) -> Result<Vec<TransactionRef>, StreamError> {
        let mut s = self.state();
        Self::injected_failure(&mut s, "getPendingTransactions")?;
        Ok(s.pending.clone())
    }
}
