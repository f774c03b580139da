//! Delivery side of a subscription: the item channel and the error channel.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::types::StreamItem;

/// Pushes items to the consumer, one at a time, with backpressure.
///
/// `send` only returns once the bounded channel has accepted the item, so the
/// walker never fetches further ahead than the channel capacity allows.
#[derive(Clone)]
pub struct ItemSink {
    tx: mpsc::Sender<StreamItem>,
    cancel: CancellationToken,
}

impl ItemSink {
    pub fn new(tx: mpsc::Sender<StreamItem>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// `Err(Cancelled)` once the subscription is cancelled or the consumer is gone.
    pub fn ensure_open(&self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() || self.tx.is_closed() {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }

    /// Deliver one item, waiting for channel capacity or cancellation.
    pub async fn send(&self, item: StreamItem) -> Result<(), StreamError> {
        self.ensure_open()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            sent = self.tx.send(item) => sent.map_err(|_| StreamError::Cancelled),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A subscription's error channel holding `capacity` transient errors.
///
/// One extra slot stays free for the error that ends the stream, so a consumer
/// that has not drained earlier errors still sees why the stream failed.
pub fn error_channel(capacity: usize) -> (ErrorReporter, ErrorChannel) {
    let (tx, rx) = mpsc::channel(capacity + 1);
    (ErrorReporter::new(tx), ErrorChannel::new(rx))
}

/// Routes errors to the consumer-visible error channel without ever blocking the walker.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<StreamError>,
}

impl ErrorReporter {
    pub fn new(tx: mpsc::Sender<StreamError>) -> Self {
        Self { tx }
    }

    /// Report a recoverable error. Dropped with a warning once only the
    /// terminal slot is left.
    pub fn report(&self, error: StreamError) {
        if self.tx.capacity() <= 1 {
            if !self.tx.is_closed() {
                tracing::warn!(error = %error, "error channel full, dropping error");
            }
            return;
        }
        self.push(error);
    }

    /// Report the error that ends the stream, into the slot [`report`](Self::report) keeps free.
    pub fn report_terminal(&self, error: StreamError) {
        self.push(error);
    }

    fn push(&self, error: StreamError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(e)) => {
                tracing::warn!(error = %e, "error channel full, dropping error");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Consumer end of a subscription's error channel.
pub struct ErrorChannel {
    rx: mpsc::Receiver<StreamError>,
}

impl ErrorChannel {
    pub(crate) fn new(rx: mpsc::Receiver<StreamError>) -> Self {
        Self { rx }
    }

    /// Wait for the next error. `None` once the subscription has ended and the channel is drained.
    pub async fn recv(&mut self) -> Option<StreamError> {
        self.rx.recv().await
    }

    /// Next already-queued error, if any.
    pub fn try_recv(&mut self) -> Option<StreamError> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued right now.
    pub fn drain(&mut self) -> Vec<StreamError> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
