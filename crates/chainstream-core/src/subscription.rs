//! Subscriptions: one scheduler, one walker and one consumer handle each.
//!
//! ```text
//! SubscriptionManager::subscribe(kind)
//!     ├── StreamState      (fresh per subscription, never shared)
//!     ├── walker           RangeWalker | ReplayWalker | PendingPoolWalker
//!     ├── PollScheduler    (one task, ticks never overlap)
//!     └── (Subscription, ErrorChannel)  handed to the consumer
//! ```
//!
//! A subscription ends exactly once, with a [`Termination`]. Cancelling (or
//! dropping) the [`Subscription`] stops the walker; nothing is delivered after
//! `unsubscribe` returns, including items still buffered in the channel.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ChainClient;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::extractor::TransactionExtractor;
use crate::fetcher::BlockFetcher;
use crate::log_filter::LogFilterStream;
use crate::pending::PendingPoolWalker;
use crate::projection::BlockProjection;
use crate::replay::{ReplaySpec, ReplayWalker};
use crate::scheduler::{PollHandle, PollScheduler, PollTask, Termination, TickOutcome};
use crate::sink::{error_channel, ErrorChannel, ErrorReporter, ItemSink};
use crate::tip_cache::{MaxAge, RefreshPolicy, TipCache};
use crate::tracker::{BlockNumberTracker, RangeWalker, StreamState};
use crate::types::{BlockParameter, Direction, FilterCriteria, StreamItem};

// ─── SubscriptionKind ─────────────────────────────────────────────────────────

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubscriptionKind {
    /// Hashes of blocks produced after subscribing.
    NewBlockHashes,
    /// Hashes of transactions entering the pending pool.
    PendingTransactionHashes,
    /// Full transactions of blocks produced after subscribing.
    Transactions,
    /// Hashes of transactions of blocks produced after subscribing.
    TransactionHashes,
    /// Full transactions entering the pending pool.
    PendingTransactions,
    /// Blocks produced after subscribing.
    Blocks {
        #[serde(default)]
        full_transactions: bool,
    },
    /// Logs of blocks produced after subscribing that match the filter.
    LogsMatching(FilterCriteria),
    /// Every block of `start..=end`, once, in order; then completes.
    ReplayRange {
        start: BlockParameter,
        end: BlockParameter,
        /// Expected direction; derived from the bounds when absent.
        #[serde(default)]
        direction: Option<Direction>,
        #[serde(default)]
        full_transactions: bool,
    },
    /// Every block from `start` up to the current tip, then new blocks as they appear.
    ReplayRangeThenLive {
        start: BlockParameter,
        #[serde(default)]
        full_transactions: bool,
    },
    /// Transactions of every block of `start..=end`; then completes.
    ReplayTransactions {
        start: BlockParameter,
        end: BlockParameter,
    },
    /// Transactions from block `start` up to the current tip, then live.
    ReplayTransactionsThenLive { start: BlockParameter },
}

impl SubscriptionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewBlockHashes => "new-block-hashes",
            Self::PendingTransactionHashes => "pending-transaction-hashes",
            Self::Transactions => "transactions",
            Self::TransactionHashes => "transaction-hashes",
            Self::PendingTransactions => "pending-transactions",
            Self::Blocks { .. } => "blocks",
            Self::LogsMatching(_) => "logs",
            Self::ReplayRange { .. } => "replay-range",
            Self::ReplayRangeThenLive { .. } => "replay-range-then-live",
            Self::ReplayTransactions { .. } => "replay-transactions",
            Self::ReplayTransactionsThenLive { .. } => "replay-transactions-then-live",
        }
    }

    /// Replay parameters, for the replay kinds.
    fn replay_spec(&self) -> Option<ReplaySpec> {
        match *self {
            Self::ReplayRange { start, end, direction, .. } => Some(ReplaySpec {
                direction,
                ..ReplaySpec::bounded(start, end)
            }),
            Self::ReplayTransactions { start, end } => Some(ReplaySpec::bounded(start, end)),
            Self::ReplayRangeThenLive { start, .. } | Self::ReplayTransactionsThenLive { start } => {
                Some(ReplaySpec::then_live(start))
            }
            _ => None,
        }
    }

    /// What each walked block is turned into, for the block-indexed kinds.
    fn projection(&self) -> Option<BlockProjection> {
        match self {
            Self::NewBlockHashes => Some(BlockProjection::BlockHash),
            Self::Transactions
            | Self::ReplayTransactions { .. }
            | Self::ReplayTransactionsThenLive { .. } => {
                Some(BlockProjection::Transactions(TransactionExtractor::full()))
            }
            Self::TransactionHashes => {
                Some(BlockProjection::Transactions(TransactionExtractor::hashes_only()))
            }
            Self::Blocks { full_transactions }
            | Self::ReplayRange { full_transactions, .. }
            | Self::ReplayRangeThenLive { full_transactions, .. } => Some(BlockProjection::Block {
                full_transactions: *full_transactions,
            }),
            Self::LogsMatching(criteria) => {
                Some(BlockProjection::Logs(LogFilterStream::new(criteria.clone())))
            }
            Self::PendingTransactionHashes | Self::PendingTransactions => None,
        }
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// Identifies a subscription within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Consumer handle: a lazy, backpressured sequence of [`StreamItem`]s.
///
/// The sequence ends when the subscription terminates; [`termination`](Self::termination)
/// then tells how. Dropping the handle cancels the subscription.
pub struct Subscription {
    id: SubscriptionId,
    label: &'static str,
    items: ReceiverStream<StreamItem>,
    cancel: CancellationToken,
    handle: Option<PollHandle>,
    terminated: Option<Termination>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `true` once the walker has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, PollHandle::is_finished)
    }

    /// Stop the walker and wait until it has stopped.
    ///
    /// A fetch already in flight is allowed to finish; its result is discarded.
    /// Returns how the subscription ended, which is `Cancelled` unless it had
    /// already ended on its own.
    pub async fn cancel(&mut self) -> Termination {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the subscription to end on its own.
    pub async fn termination(&mut self) -> Termination {
        self.wait().await
    }

    async fn wait(&mut self) -> Termination {
        if let Some(handle) = self.handle.take() {
            let t = handle.join().await;
            debug!(id = %self.id, kind = self.label, termination = ?t, "subscription ended");
            self.terminated = Some(t);
        }
        self.terminated.clone().unwrap_or(Termination::Cancelled)
    }
}

impl Stream for Subscription {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamItem>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.items).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

type Registry = Arc<Mutex<HashMap<SubscriptionId, &'static str>>>;

/// Removes its subscription from the registry when the walker is dropped.
struct Registration {
    id: SubscriptionId,
    registry: Registry,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// A walker bound to its registry entry.
struct Registered<T> {
    task: T,
    _registration: Registration,
}

#[async_trait]
impl<T: PollTask> PollTask for Registered<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn tick(&mut self) -> Result<TickOutcome, StreamError> {
        self.task.tick().await
    }
}

// ─── SubscriptionManager ──────────────────────────────────────────────────────

/// Creates subscriptions over one chain client and owns their cancellation.
pub struct SubscriptionManager {
    fetcher: BlockFetcher,
    config: StreamConfig,
    scheduler: PollScheduler,
    tip_cache: Arc<TipCache>,
    registry: Registry,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    /// Create a manager. The tip cache refreshes once older than `tip_cache_max_age_ms`.
    pub fn new(client: Arc<dyn ChainClient>, config: StreamConfig) -> Result<Self, StreamError> {
        let policy = MaxAge(config.tip_cache_max_age());
        Self::with_refresh_policy(client, config, policy)
    }

    /// Create a manager whose tip cache refreshes according to `policy`.
    pub fn with_refresh_policy(
        client: Arc<dyn ChainClient>,
        config: StreamConfig,
        policy: impl RefreshPolicy + 'static,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let tip_cache = Arc::new(TipCache::new(client.clone(), config.block_limit, policy));
        let fetcher = BlockFetcher::new(client, config.max_in_flight_requests)
            .with_tip_cache(tip_cache.clone());
        Ok(Self {
            fetcher,
            scheduler: PollScheduler::new(config.poll_interval()),
            config,
            tip_cache,
            registry: Arc::default(),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn builder() -> crate::builder::SubscriptionManagerBuilder {
        crate::builder::SubscriptionManagerBuilder::new()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &BlockFetcher {
        &self.fetcher
    }

    pub fn tip_cache(&self) -> &Arc<TipCache> {
        &self.tip_cache
    }

    /// Start a subscription. Nothing is fetched until the first tick.
    ///
    /// Replay bounds that contradict the requested direction are rejected here
    /// when both are explicit numbers; otherwise they fail the first tick.
    pub fn subscribe(
        &self,
        kind: SubscriptionKind,
    ) -> Result<(Subscription, ErrorChannel), StreamError> {
        if self.shutdown.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let replay = kind.replay_spec();
        if let Some(spec) = &replay {
            spec.validate()?;
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = kind.label();
        let cancel = self.shutdown.child_token();
        let (item_tx, item_rx) = mpsc::channel(self.config.channel_capacity);
        let sink = ItemSink::new(item_tx, cancel.clone());
        let (errors, error_rx) = error_channel(self.config.error_channel_capacity);
        let state = StreamState::new(Direction::Ascending, self.config.poll_interval(), cancel.clone());

        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, label);
        let registration = Registration {
            id,
            registry: self.registry.clone(),
        };

        let fetcher = self.fetcher.clone();
        let handle = match (kind.projection(), replay) {
            (Some(projection), Some(spec)) => self.start(
                ReplayWalker::new(fetcher, projection, sink, spec, state),
                registration,
                errors,
                cancel.clone(),
            ),
            (Some(projection), None) => self.start(
                RangeWalker::new(fetcher, BlockNumberTracker::from_tip(state), projection, sink),
                registration,
                errors,
                cancel.clone(),
            ),
            (None, _) => {
                let hashes_only = kind == SubscriptionKind::PendingTransactionHashes;
                self.start(
                    PendingPoolWalker::new(fetcher, sink, hashes_only),
                    registration,
                    errors,
                    cancel.clone(),
                )
            }
        };
        info!(%id, kind = label, interval_ms = self.config.poll_interval_ms, "subscribed");

        let subscription = Subscription {
            id,
            label,
            items: ReceiverStream::new(item_rx),
            cancel,
            handle: Some(handle),
            terminated: None,
        };
        Ok((subscription, error_rx))
    }

    fn start<T: PollTask>(
        &self,
        task: T,
        registration: Registration,
        errors: ErrorReporter,
        cancel: CancellationToken,
    ) -> PollHandle {
        let task = Registered {
            task,
            _registration: registration,
        };
        self.scheduler.start(task, errors, cancel)
    }

    /// Stop `subscription` and wait until its walker has stopped.
    pub async fn unsubscribe(&self, mut subscription: Subscription) -> Termination {
        let termination = subscription.cancel().await;
        info!(id = %subscription.id(), kind = subscription.label(), ?termination, "unsubscribed");
        termination
    }

    /// Subscriptions whose walker is still running.
    pub fn active_count(&self) -> usize {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Cancel every subscription. Later `subscribe` calls fail.
    pub fn shutdown(&self) {
        info!(active = self.active_count(), "shutting down subscriptions");
        self.shutdown.cancel();
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChain;
    use futures::StreamExt;
    use std::time::Duration;

    fn manager(chain: &Arc<InMemoryChain>) -> SubscriptionManager {
        let config = StreamConfig {
            poll_interval_ms: 5,
            ..StreamConfig::default()
        };
        SubscriptionManager::new(chain.clone(), config).unwrap()
    }

    #[test]
    fn kinds_round_trip_through_json() {
        let kind: SubscriptionKind = serde_json::from_str(
            r#"{ "kind": "replayRange", "start": { "number": 100 }, "end": "latest" }"#,
        )
        .unwrap();
        assert_eq!(
            kind,
            SubscriptionKind::ReplayRange {
                start: BlockParameter::Number(100),
                end: BlockParameter::Latest,
                direction: None,
                full_transactions: false,
            }
        );
        assert_eq!(kind.label(), "replay-range");
    }

    #[tokio::test]
    async fn contradictory_replay_is_rejected_at_subscribe() {
        let chain = Arc::new(InMemoryChain::with_tip(200, 0));
        let mgr = manager(&chain);
        let result = mgr.subscribe(SubscriptionKind::ReplayRange {
            start: 100.into(),
            end: 95.into(),
            direction: Some(Direction::Ascending),
            full_transactions: false,
        });
        assert!(matches!(result, Err(StreamError::InvalidRange(_))));
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn registry_tracks_running_walkers() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let mgr = manager(&chain);
        let (a, _ea) = mgr.subscribe(SubscriptionKind::NewBlockHashes).unwrap();
        let (b, _eb) = mgr.subscribe(SubscriptionKind::Blocks { full_transactions: false }).unwrap();
        assert_eq!(mgr.active_ids(), vec![a.id(), b.id()]);

        assert_eq!(mgr.unsubscribe(a).await, Termination::Cancelled);
        assert_eq!(mgr.active_ids(), vec![b.id()]);
    }

    #[tokio::test]
    async fn completed_replay_leaves_the_registry() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let mgr = manager(&chain);
        let (mut sub, _errors) = mgr
            .subscribe(SubscriptionKind::ReplayRange {
                start: 1.into(),
                end: 3.into(),
                direction: None,
                full_transactions: false,
            })
            .unwrap();
        let numbers: Vec<_> = (&mut sub).filter_map(|i| async move { i.block_number() }).collect().await;
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(sub.termination().await, Termination::Completed);
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let mgr = manager(&chain);
        let (mut a, _ea) = mgr.subscribe(SubscriptionKind::NewBlockHashes).unwrap();
        let (mut b, _eb) = mgr.subscribe(SubscriptionKind::PendingTransactions).unwrap();

        mgr.shutdown();
        assert_eq!(a.termination().await, Termination::Cancelled);
        assert_eq!(b.termination().await, Termination::Cancelled);
        assert_eq!(a.next().await, None);
        assert_eq!(mgr.active_count(), 0);
        assert!(matches!(
            mgr.subscribe(SubscriptionKind::NewBlockHashes),
            Err(StreamError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let mgr = manager(&chain);
        let (sub, _errors) = mgr.subscribe(SubscriptionKind::NewBlockHashes).unwrap();
        drop(sub);
        tokio::time::timeout(Duration::from_secs(1), async {
            while mgr.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }
}
