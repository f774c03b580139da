//! Live block tracking. Turns tip polling into a gapless, duplicate-free
//! sequence of block numbers.
//!
//! Each tick the [`RangeWalker`] reads the tip `T` once and walks
//! `last_emitted + 1 ..= T` in increasing order, recording every block as soon
//! as its items have been accepted downstream. An interrupted walk resumes at
//! the first unrecorded number on the next tick.

use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::fetcher::BlockFetcher;
use crate::projection::BlockProjection;
use crate::scheduler::{PollTask, TickOutcome};
use crate::sink::ItemSink;
use crate::types::{BlockNumber, Direction};

// ─── StreamState ──────────────────────────────────────────────────────────────

/// Progress of one subscription. Owned by exactly one walker.
#[derive(Debug, Clone)]
pub struct StreamState {
    last_emitted: Option<BlockNumber>,
    direction: Direction,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl StreamState {
    pub fn new(direction: Direction, poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            last_emitted: None,
            direction,
            poll_interval,
            cancel,
        }
    }

    pub fn last_emitted(&self) -> Option<BlockNumber> {
        self.last_emitted
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record that every item of block `number` has been delivered.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `number` does not strictly follow the last
    /// emitted block in this stream's direction.
    pub fn advance(&mut self, number: BlockNumber) {
        debug_assert!(
            self.last_emitted
                .map_or(true, |last| self.direction.is_after(last, number)),
            "block {number} emitted out of order after {:?}",
            self.last_emitted
        );
        self.last_emitted = Some(number);
    }

    /// Position the stream just after `number` without emitting it.
    pub fn seed(&mut self, number: BlockNumber) {
        self.last_emitted = Some(number);
    }

    /// The same position, continuing upwards (replay-to-live handoff).
    pub fn into_ascending(mut self) -> Self {
        self.direction = Direction::Ascending;
        self
    }
}

// ─── BlockNumberTracker ───────────────────────────────────────────────────────

/// Computes, per observed tip, which block numbers are new.
#[derive(Debug, Clone)]
pub struct BlockNumberTracker {
    state: StreamState,
    /// First block to emit when nothing has been emitted yet; `None` = start after the current tip.
    origin: Option<BlockNumber>,
}

impl BlockNumberTracker {
    /// Emit only blocks produced after the first observed tip.
    pub fn from_tip(state: StreamState) -> Self {
        Self {
            state,
            origin: None,
        }
    }

    /// Emit `first`, `first + 1`, … as they become available.
    pub fn starting_at(state: StreamState, first: BlockNumber) -> Self {
        Self {
            state,
            origin: Some(first),
        }
    }

    /// Continue after the state's last emitted block.
    ///
    /// Falls back to `first` if nothing has been emitted.
    pub fn resume(state: StreamState, first: BlockNumber) -> Self {
        Self {
            state: state.into_ascending(),
            origin: Some(first),
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// The block numbers to fetch given tip `tip`, if any.
    pub fn pending(&mut self, tip: BlockNumber) -> Option<RangeInclusive<BlockNumber>> {
        let next = match (self.state.last_emitted(), self.origin) {
            (Some(last), _) if tip < last => {
                warn!(tip, last_emitted = last, "tip below last emitted block, skipping tick");
                return None;
            }
            (Some(last), _) => last.checked_add(1)?,
            (None, Some(first)) => first,
            (None, None) => {
                debug!(tip, "live stream anchored at tip");
                self.state.seed(tip);
                return None;
            }
        };
        (next <= tip).then_some(next..=tip)
    }

    pub fn record(&mut self, number: BlockNumber) {
        self.state.advance(number);
    }
}

// ─── RangeWalker ──────────────────────────────────────────────────────────────

/// Live ascending walker: one tip read per tick, then every new block in order.
pub struct RangeWalker {
    fetcher: BlockFetcher,
    tracker: BlockNumberTracker,
    projection: BlockProjection,
    sink: ItemSink,
}

impl RangeWalker {
    pub fn new(
        fetcher: BlockFetcher,
        tracker: BlockNumberTracker,
        projection: BlockProjection,
        sink: ItemSink,
    ) -> Self {
        Self {
            fetcher,
            tracker,
            projection,
            sink,
        }
    }

    pub fn tracker(&self) -> &BlockNumberTracker {
        &self.tracker
    }

    /// One tick of the live algorithm.
    pub async fn step(&mut self) -> Result<TickOutcome, StreamError> {
        self.sink.ensure_open()?;
        let tip = self.fetcher.tip().await?;
        let Some(range) = self.tracker.pending(tip) else {
            return Ok(TickOutcome::Idle);
        };
        debug!(from = range.start(), to = range.end(), kind = self.projection.label(), "new blocks");

        for number in range {
            self.sink.ensure_open()?;
            let Some(items) = self.projection.project(&self.fetcher, number).await? else {
                warn!(number, tip, "block at or below tip not found");
                return Err(StreamError::block_not_found(number));
            };
            // Discard the result of a fetch that finished after cancellation.
            self.sink.ensure_open()?;
            for item in items {
                self.sink.send(item).await?;
            }
            self.tracker.record(number);
        }
        Ok(TickOutcome::Progressed)
    }
}

#[async_trait]
impl PollTask for RangeWalker {
    fn name(&self) -> &str {
        self.projection.label()
    }

    async fn tick(&mut self) -> Result<TickOutcome, StreamError> {
        self.step().await
    }
}
