//! Historical replay over a closed block range, optionally handing off to
//! live tracking at the exact seam.
//!
//! The range is resolved against the tip on the first tick. The walk is
//! resumable: a failed fetch ends the tick without advancing, and the next
//! tick continues at the same number.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::fetcher::BlockFetcher;
use crate::projection::BlockProjection;
use crate::scheduler::{PollTask, TickOutcome};
use crate::sink::ItemSink;
use crate::tracker::{BlockNumberTracker, RangeWalker, StreamState};
use crate::types::{BlockNumber, BlockParameter, Direction};

/// What happens once the replayed range is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEnd {
    /// Walk down or up to this bound, then complete.
    Bounded(BlockParameter),
    /// Walk up to the tip seen at the first tick, then follow the chain live.
    ThenLive,
}

/// Request for a replay subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySpec {
    pub start: BlockParameter,
    pub end: ReplayEnd,
    /// Expected direction; `None` derives it from the resolved bounds.
    pub direction: Option<Direction>,
}

impl ReplaySpec {
    pub fn bounded(start: BlockParameter, end: BlockParameter) -> Self {
        Self {
            start,
            end: ReplayEnd::Bounded(end),
            direction: None,
        }
    }

    pub fn then_live(start: BlockParameter) -> Self {
        Self {
            start,
            end: ReplayEnd::ThenLive,
            direction: Some(Direction::Ascending),
        }
    }

    /// Reject bounds that can be judged without the tip.
    pub fn validate(&self) -> Result<(), StreamError> {
        let (Some(start), ReplayEnd::Bounded(end)) = (self.start.as_number(), self.end) else {
            return Ok(());
        };
        let (Some(end), Some(expected)) = (end.as_number(), self.direction) else {
            return Ok(());
        };
        check_direction(start, end, expected)
    }
}

fn check_direction(start: BlockNumber, end: BlockNumber, expected: Direction) -> Result<(), StreamError> {
    let actual = Direction::between(start, end);
    if start != end && actual != expected {
        return Err(StreamError::InvalidRange(format!(
            "{start}..{end} is {actual}, requested {expected}"
        )));
    }
    Ok(())
}

/// Bounds fixed on the first tick.
#[derive(Debug, Clone, Copy)]
struct Plan {
    first: BlockNumber,
    end: BlockNumber,
    /// Highest tip seen so far; a missing block at or below it is an anomaly.
    observed_tip: BlockNumber,
    /// Re-read the tip at the end and keep going while it has advanced.
    follow_latest: bool,
    continue_live: bool,
}

enum Phase {
    Resolving,
    Replaying(Plan),
    Live(RangeWalker),
}

/// Walks a historical range once, in order, independent of the live tip.
pub struct ReplayWalker {
    fetcher: BlockFetcher,
    projection: BlockProjection,
    sink: ItemSink,
    spec: ReplaySpec,
    state: StreamState,
    phase: Phase,
}

impl ReplayWalker {
    pub fn new(
        fetcher: BlockFetcher,
        projection: BlockProjection,
        sink: ItemSink,
        spec: ReplaySpec,
        state: StreamState,
    ) -> Self {
        Self {
            fetcher,
            projection,
            sink,
            spec,
            state,
            phase: Phase::Resolving,
        }
    }

    pub fn last_emitted(&self) -> Option<BlockNumber> {
        match &self.phase {
            Phase::Live(w) => w.tracker().state().last_emitted(),
            _ => self.state.last_emitted(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live(_))
    }

    pub async fn step(&mut self) -> Result<TickOutcome, StreamError> {
        self.sink.ensure_open()?;
        let before = self.last_emitted();
        loop {
            match &mut self.phase {
                Phase::Resolving => self.resolve().await?,
                Phase::Live(walker) => {
                    let handed_off = walker.tracker().state().last_emitted() != before;
                    return match walker.step().await? {
                        TickOutcome::Idle if handed_off => Ok(TickOutcome::Progressed),
                        outcome => Ok(outcome),
                    };
                }
                Phase::Replaying(plan) => {
                    let mut plan = *plan;
                    let outcome = self.replay(&mut plan).await;
                    if let Phase::Replaying(p) = &mut self.phase {
                        *p = plan;
                    }
                    match outcome? {
                        Some(outcome) => return Ok(outcome),
                        None => continue,
                    }
                }
            }
        }
    }

    async fn resolve(&mut self) -> Result<(), StreamError> {
        let tip = self.fetcher.tip().await?;
        let first = self.spec.start.resolve(tip);
        let (end, follow_latest, continue_live) = match self.spec.end {
            ReplayEnd::Bounded(end) => (end.resolve(tip), end == BlockParameter::Latest, false),
            ReplayEnd::ThenLive => (tip, false, true),
        };

        if continue_live && first > end {
            info!(first, tip, "replay start is beyond the tip, following live from start");
            let tracker = BlockNumberTracker::starting_at(self.state.clone(), first);
            self.go_live(tracker);
            return Ok(());
        }
        if let Some(expected) = self.spec.direction {
            check_direction(first, end, expected)?;
        }
        let direction = Direction::between(first, end);
        self.state = StreamState::new(direction, self.state.poll_interval(), self.sink.cancel_token().clone());

        info!(first, end, tip, %direction, continue_live, "replay resolved");
        self.phase = Phase::Replaying(Plan {
            first,
            end,
            observed_tip: tip,
            follow_latest: follow_latest && direction == Direction::Ascending,
            continue_live,
        });
        Ok(())
    }

    /// Walk the rest of the range. `Ok(None)` means the phase changed and the caller should continue.
    async fn replay(&mut self, plan: &mut Plan) -> Result<Option<TickOutcome>, StreamError> {
        loop {
            let next = match self.state.last_emitted() {
                None => Some(plan.first),
                Some(last) if last == plan.end => None,
                Some(last) => self.state.direction().step(last),
            };
            let Some(number) = next else {
                if plan.follow_latest {
                    let tip = self.fetcher.tip().await?;
                    if tip > plan.end {
                        debug!(old_end = plan.end, new_end = tip, "tip advanced during replay, extending");
                        plan.end = tip;
                        plan.observed_tip = tip;
                        continue;
                    }
                }
                return Ok(self.finish());
            };

            self.sink.ensure_open()?;
            match self.projection.project(&self.fetcher, number).await? {
                Some(items) => {
                    self.sink.ensure_open()?;
                    for item in items {
                        self.sink.send(item).await?;
                    }
                    self.state.advance(number);
                }
                None if number <= plan.observed_tip => {
                    warn!(number, tip = plan.observed_tip, "replayed block below tip not found");
                    return Err(StreamError::block_not_found(number));
                }
                None => {
                    info!(number, tip = plan.observed_tip, "replay range exhausted");
                    return Ok(self.finish());
                }
            }
        }
    }

    /// End of the historical range: complete, or hand off to live tracking.
    fn finish(&mut self) -> Option<TickOutcome> {
        let Phase::Replaying(plan) = &self.phase else {
            return Some(TickOutcome::Completed);
        };
        if !plan.continue_live {
            debug!(last = ?self.state.last_emitted(), "replay complete");
            return Some(TickOutcome::Completed);
        }
        let tracker = BlockNumberTracker::resume(self.state.clone(), plan.first);
        info!(last = ?self.state.last_emitted(), "replay caught up, switching to live");
        self.go_live(tracker);
        None
    }

    fn go_live(&mut self, tracker: BlockNumberTracker) {
        self.phase = Phase::Live(RangeWalker::new(
            self.fetcher.clone(),
            tracker,
            self.projection.clone(),
            self.sink.clone(),
        ));
    }
}

#[async_trait]
impl PollTask for ReplayWalker {
    fn name(&self) -> &str {
        "replay"
    }

    async fn tick(&mut self) -> Result<TickOutcome, StreamError> {
        self.step().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChain;
    use crate::types::StreamItem;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn walker(
        chain: &Arc<InMemoryChain>,
        spec: ReplaySpec,
    ) -> (ReplayWalker, mpsc::Receiver<StreamItem>) {
        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let state = StreamState::new(Direction::Ascending, Duration::from_millis(10), cancel.clone());
        let walker = ReplayWalker::new(
            BlockFetcher::new(chain.clone(), 4),
            BlockProjection::Block { full_transactions: false },
            ItemSink::new(tx, cancel),
            spec,
            state,
        );
        (walker, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<StreamItem>) -> Vec<BlockNumber> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|i| i.block_number())
            .collect()
    }

    #[tokio::test]
    async fn ascending_range() {
        let chain = Arc::new(InMemoryChain::with_tip(120, 0));
        let (mut w, mut rx) = walker(&chain, ReplaySpec::bounded(100.into(), 105.into()));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Completed);
        assert_eq!(drain(&mut rx), vec![100, 101, 102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn descending_range() {
        let chain = Arc::new(InMemoryChain::with_tip(120, 0));
        let (mut w, mut rx) = walker(&chain, ReplaySpec::bounded(100.into(), 95.into()));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Completed);
        assert_eq!(drain(&mut rx), vec![100, 99, 98, 97, 96, 95]);
    }

    #[tokio::test]
    async fn descending_to_genesis() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let (mut w, mut rx) = walker(&chain, ReplaySpec::bounded(2.into(), BlockParameter::Earliest));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Completed);
        assert_eq!(drain(&mut rx), vec![2, 1, 0]);
    }

    #[test]
    fn contradictory_direction_is_rejected() {
        let spec = ReplaySpec {
            direction: Some(Direction::Ascending),
            ..ReplaySpec::bounded(100.into(), 95.into())
        };
        assert!(matches!(spec.validate(), Err(StreamError::InvalidRange(_))));
        assert!(ReplaySpec::bounded(100.into(), 95.into()).validate().is_ok());
    }

    #[tokio::test]
    async fn end_beyond_tip_completes_at_tip() {
        let chain = Arc::new(InMemoryChain::with_tip(12, 0));
        let (mut w, mut rx) = walker(&chain, ReplaySpec::bounded(10.into(), 50.into()));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Completed);
        assert_eq!(drain(&mut rx), vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn failure_mid_range_resumes_without_gap() {
        let chain = Arc::new(InMemoryChain::with_tip(120, 0));
        chain.fail_block(102, 1);
        let (mut w, mut rx) = walker(&chain, ReplaySpec::bounded(100.into(), 105.into()));
        assert!(w.step().await.unwrap_err().is_transient());
        assert_eq!(w.last_emitted(), Some(101));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Completed);
        assert_eq!(drain(&mut rx), vec![100, 101, 102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn latest_end_follows_tip_until_caught_up() {
        let chain = Arc::new(InMemoryChain::with_tip(5, 0));
        chain.mine_on_tip_request(2, 2);
        let (mut w, mut rx) = walker(&chain, ReplaySpec::bounded(3.into(), BlockParameter::Latest));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Completed);
        assert_eq!(drain(&mut rx), vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn then_live_hands_off_at_seam() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let (mut w, mut rx) = walker(&chain, ReplaySpec::then_live(8.into()));

        assert_eq!(w.step().await.unwrap(), TickOutcome::Progressed);
        assert!(w.is_live());
        assert_eq!(drain(&mut rx), vec![8, 9, 10]);

        assert_eq!(w.step().await.unwrap(), TickOutcome::Idle);
        chain.mine(2);
        assert_eq!(w.step().await.unwrap(), TickOutcome::Progressed);
        assert_eq!(drain(&mut rx), vec![11, 12]);
    }

    #[tokio::test]
    async fn then_live_from_future_block_waits_for_it() {
        let chain = Arc::new(InMemoryChain::with_tip(10, 0));
        let (mut w, mut rx) = walker(&chain, ReplaySpec::then_live(13.into()));
        assert_eq!(w.step().await.unwrap(), TickOutcome::Idle);
        chain.mine(4);
        w.step().await.unwrap();
        assert_eq!(drain(&mut rx), vec![13, 14]);
    }
}
