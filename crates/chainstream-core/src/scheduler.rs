//! Fixed-interval tick execution for one subscription.
//!
//! Every subscription gets its own scheduler task. Ticks run inline in that
//! task, so at most one is ever in flight; a tick that overruns the interval
//! causes the missed ticks to be skipped, not queued.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::StreamError;
use crate::sink::ErrorReporter;

/// Result of one successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new on the chain.
    Idle,
    /// At least one item was emitted.
    Progressed,
    /// The stream is exhausted; stop scheduling.
    Completed,
}

/// How a subscription ended. Every subscription ends with exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A bounded replay reached its end with no live continuation.
    Completed,
    /// A fatal error stopped the stream. The same error was sent to the error channel.
    Failed(StreamError),
    /// The subscriber cancelled or went away.
    Cancelled,
}

/// Work performed on every tick.
#[async_trait]
pub trait PollTask: Send + 'static {
    /// Label used in log events.
    fn name(&self) -> &str;

    async fn tick(&mut self) -> Result<TickOutcome, StreamError>;
}

/// Runs a [`PollTask`] every `interval` until it completes, fails or is cancelled.
#[derive(Debug, Clone, Copy)]
pub struct PollScheduler {
    interval: Duration,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the tick loop. The first tick runs immediately.
    ///
    /// Transient errors are reported and the loop keeps going; fatal errors are
    /// reported and end the loop.
    pub fn start<T: PollTask>(
        &self,
        mut task: T,
        errors: ErrorReporter,
        cancel: CancellationToken,
    ) -> PollHandle {
        let interval = self.interval;
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Termination::Cancelled,
                    _ = ticker.tick() => {}
                }
                ticks += 1;
                match task.tick().await {
                    Ok(TickOutcome::Completed) => {
                        debug!(task = task.name(), ticks, "stream completed");
                        return Termination::Completed;
                    }
                    Ok(outcome) => {
                        debug!(task = task.name(), tick = ticks, ?outcome, "tick done");
                    }
                    Err(StreamError::Cancelled) => return Termination::Cancelled,
                    Err(e) if e.is_fatal() => {
                        error!(task = task.name(), error = %e, "stream failed");
                        errors.report_terminal(e.clone());
                        return Termination::Failed(e);
                    }
                    Err(e) => {
                        warn!(task = task.name(), tick = ticks, error = %e, "tick failed, retrying next tick");
                        errors.report(e);
                    }
                }
            }
        });
        PollHandle { cancel, join }
    }
}

/// Handle to a running tick loop.
pub struct PollHandle {
    cancel: CancellationToken,
    join: JoinHandle<Termination>,
}

impl PollHandle {
    /// Request cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end on its own (or after [`cancel`](Self::cancel)).
    pub async fn join(self) -> Termination {
        match self.join.await {
            Ok(t) => t,
            Err(e) if e.is_cancelled() => Termination::Cancelled,
            Err(e) => Termination::Failed(StreamError::Internal(format!("poll task panicked: {e}"))),
        }
    }

    /// Cancel and wait until the loop has stopped. No tick runs after this returns.
    pub async fn stop(self) -> Termination {
        self.cancel();
        self.join().await
    }
}
