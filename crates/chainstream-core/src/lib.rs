//! chainstream-core: ordered, deduplicated streams over a poll-only block API.
//!
//! # Architecture
//!
//! ```text
//! SubscriptionManager ── subscribe(kind) ──► (Subscription, ErrorChannel)
//!        │
//!        └── per subscription: PollScheduler (one task, no overlapping ticks)
//!                 └── walker
//!                      ├── RangeWalker       (live: tip → new block numbers)
//!                      ├── ReplayWalker      (historical range, optional live handoff)
//!                      └── PendingPoolWalker (pending pool, seen-set)
//!                            │
//!                            ├── BlockProjection (hash / block / TransactionExtractor / LogFilterStream)
//!                            └── BlockFetcher ── ChainClient (remote calls, bounded in-flight)
//!                                      └── TipCache (cached tip + block limit offset)
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod log_filter;
pub mod logging;
pub mod memory;
pub mod pending;
pub mod projection;
pub mod replay;
pub mod scheduler;
pub mod sink;
pub mod subscription;
pub mod tip_cache;
pub mod tracker;
pub mod types;

pub use builder::SubscriptionManagerBuilder;
pub use client::ChainClient;
pub use config::StreamConfig;
pub use error::StreamError;
pub use extractor::TransactionExtractor;
pub use fetcher::BlockFetcher;
pub use log_filter::LogFilterStream;
pub use logging::{init_tracing, LogConfig, LogFormat};
pub use memory::InMemoryChain;
pub use pending::PendingPoolWalker;
pub use projection::BlockProjection;
pub use replay::{ReplayEnd, ReplaySpec, ReplayWalker};
pub use scheduler::{PollHandle, PollScheduler, PollTask, Termination, TickOutcome};
pub use sink::{error_channel, ErrorChannel, ErrorReporter, ItemSink};
pub use subscription::{Subscription, SubscriptionId, SubscriptionKind, SubscriptionManager};
pub use tip_cache::{MaxAge, ObservedOnly, RefreshPolicy, TipCache};
pub use tracker::{BlockNumberTracker, RangeWalker, StreamState};
pub use types::{
    BlockNumber, BlockParameter, BlockRef, BlockTransaction, Direction, FilterCriteria, LogEntry,
    StreamItem, TopicMatcher, TransactionRef,
};
