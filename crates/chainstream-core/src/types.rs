//! Shared data model: blocks, transactions, logs, filters and stream items.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Height of a block on the remote chain.
pub type BlockNumber = u64;

// ─── Direction ────────────────────────────────────────────────────────────────

/// Order in which a stream walks block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// Direction of the closed range `start..=end`. A single-block range is ascending.
    pub fn between(start: BlockNumber, end: BlockNumber) -> Self {
        if end >= start {
            Self::Ascending
        } else {
            Self::Descending
        }
    }

    /// The number after `current` in this direction, or `None` at the edge of `u64`.
    pub fn step(self, current: BlockNumber) -> Option<BlockNumber> {
        match self {
            Self::Ascending => current.checked_add(1),
            Self::Descending => current.checked_sub(1),
        }
    }

    /// Returns `true` if `next` strictly follows `prev` in this direction.
    pub fn is_after(self, prev: BlockNumber, next: BlockNumber) -> bool {
        match self {
            Self::Ascending => next > prev,
            Self::Descending => next < prev,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ascending => write!(f, "ascending"),
            Self::Descending => write!(f, "descending"),
        }
    }
}

// ─── BlockParameter ───────────────────────────────────────────────────────────

/// A block position that may depend on the remote tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockParameter {
    /// The genesis block.
    Earliest,
    /// Whatever the tip is when the walker resolves it.
    Latest,
    /// An explicit block number.
    Number(BlockNumber),
}

impl BlockParameter {
    /// Resolve against an observed tip.
    pub fn resolve(self, tip: BlockNumber) -> BlockNumber {
        match self {
            Self::Earliest => 0,
            Self::Latest => tip,
            Self::Number(n) => n,
        }
    }

    /// The explicit number, if this parameter does not depend on the tip.
    pub fn as_number(self) -> Option<BlockNumber> {
        match self {
            Self::Earliest => Some(0),
            Self::Latest => None,
            Self::Number(n) => Some(n),
        }
    }
}

impl From<BlockNumber> for BlockParameter {
    fn from(n: BlockNumber) -> Self {
        Self::Number(n)
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// A transaction as returned by the node.
///
/// Position fields are optional because pending transactions have no block yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRef {
    /// Transaction hash (`0x…`).
    pub hash: String,
    /// Containing block number (`None` while pending).
    pub block_number: Option<BlockNumber>,
    /// Containing block hash (`None` while pending).
    pub block_hash: Option<String>,
    /// Index within the containing block (`None` while pending).
    pub transaction_index: Option<u32>,
    /// Sender address.
    pub from: String,
    /// Recipient address; `None` for contract deployment.
    pub to: Option<String>,
    /// Call payload (`0x…`).
    pub input: String,
}

/// One entry of a block's transaction list: a bare hash or the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTransaction {
    Hash(String),
    Full(TransactionRef),
}

impl BlockTransaction {
    pub fn hash(&self) -> &str {
        match self {
            Self::Hash(h) => h,
            Self::Full(tx) => &tx.hash,
        }
    }

    pub fn as_full(&self) -> Option<&TransactionRef> {
        match self {
            Self::Hash(_) => None,
            Self::Full(tx) => Some(tx),
        }
    }
}

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A fetched block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block number.
    pub number: BlockNumber,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Block timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Transactions in block order, hash-only or full depending on the request.
    pub transactions: Vec<BlockTransaction>,
}

impl BlockRef {
    /// Block timestamp as a UTC datetime.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.timestamp).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

// ─── LogEntry ─────────────────────────────────────────────────────────────────

/// An event log emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract address.
    pub address: String,
    /// Indexed topics, topic 0 first.
    pub topics: Vec<String>,
    /// Non-indexed data (`0x…`).
    pub data: String,
    pub block_number: BlockNumber,
    pub transaction_hash: String,
    pub transaction_index: u32,
    /// Position of the log within its block.
    pub log_index: u32,
}

// ─── FilterCriteria ───────────────────────────────────────────────────────────

/// Matcher for a single topic position.
///
/// Serialized the way nodes expect it inside a log filter: `null`, a string,
/// or an array of alternatives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicMatcher {
    /// Matches unconditionally.
    #[default]
    Any,
    Exact(String),
    /// Matches if the topic equals any of the alternatives.
    OneOf(Vec<String>),
}

impl TopicMatcher {
    /// Returns `true` if `topic` (absent when the log has fewer topics) satisfies this matcher.
    pub fn matches(&self, topic: Option<&str>) -> bool {
        match (self, topic) {
            (Self::Any, _) => true,
            (_, None) => false,
            (Self::Exact(want), Some(t)) => want.eq_ignore_ascii_case(t),
            (Self::OneOf(alts), Some(t)) => alts.iter().any(|a| a.eq_ignore_ascii_case(t)),
        }
    }
}

impl From<&str> for TopicMatcher {
    fn from(s: &str) -> Self {
        Self::Exact(s.to_string())
    }
}

impl From<String> for TopicMatcher {
    fn from(s: String) -> Self {
        Self::Exact(s)
    }
}

impl From<Vec<String>> for TopicMatcher {
    fn from(alts: Vec<String>) -> Self {
        Self::OneOf(alts)
    }
}

/// Predicate over a log's address and topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Contract addresses to match (empty = all addresses).
    pub addresses: Vec<String>,
    /// Positional topic matchers; positions beyond the list match anything.
    pub topics: Vec<TopicMatcher>,
}

impl FilterCriteria {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add another accepted address.
    pub fn or_address(mut self, addr: impl Into<String>) -> Self {
        self.addresses.push(addr.into());
        self
    }

    /// Append a matcher for the next topic position.
    pub fn topic(mut self, matcher: impl Into<TopicMatcher>) -> Self {
        self.topics.push(matcher.into());
        self
    }

    /// Append an unconditional matcher for the next topic position.
    pub fn any_topic(mut self) -> Self {
        self.topics.push(TopicMatcher::Any);
        self
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if every topic matcher accepts the topic at its position.
    pub fn matches_topics(&self, topics: &[String]) -> bool {
        self.topics
            .iter()
            .enumerate()
            .all(|(i, m)| m.matches(topics.get(i).map(String::as_str)))
    }

    pub fn matches(&self, log: &LogEntry) -> bool {
        self.matches_address(&log.address) && self.matches_topics(&log.topics)
    }
}

// ─── StreamItem ───────────────────────────────────────────────────────────────

/// One element delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    BlockHash { number: BlockNumber, hash: String },
    Block(BlockRef),
    Transaction(TransactionRef),
    TransactionHash(String),
    Log(LogEntry),
}

impl StreamItem {
    /// The block this item belongs to, when known.
    pub fn block_number(&self) -> Option<BlockNumber> {
        match self {
            Self::BlockHash { number, .. } => Some(*number),
            Self::Block(b) => Some(b.number),
            Self::Transaction(tx) => tx.block_number,
            Self::TransactionHash(_) => None,
            Self::Log(l) => Some(l.block_number),
        }
    }

    pub fn into_block(self) -> Option<BlockRef> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_transaction(self) -> Option<TransactionRef> {
        match self {
            Self::Transaction(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn into_log(self) -> Option<LogEntry> {
        match self {
            Self::Log(l) => Some(l),
            _ => None,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
