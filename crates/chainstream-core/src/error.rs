//! Error types for block streams.

use thiserror::Error;

use crate::types::BlockNumber;

/// Errors raised while fetching, walking or delivering a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The remote call failed or timed out. Retried on the next tick.
    #[error("remote call failed: {0}")]
    Transient(String),

    /// The node has no such block or transaction.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The node answered with a payload that fails required-field validation.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Replay bounds that cannot be walked as requested.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The subscription was cancelled. Not a failure.
    #[error("subscription cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl StreamError {
    pub fn block_not_found(number: BlockNumber) -> Self {
        Self::NotFound {
            what: format!("block {number}"),
        }
    }

    /// Returns `true` if the error terminates the subscription.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::InvalidRange(_) | Self::Config(_) | Self::Internal(_)
        )
    }

    /// Returns `true` if the next tick should simply try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StreamError::Transient("timeout".into()).is_transient());
        assert!(StreamError::block_not_found(4).is_transient());
        assert!(StreamError::Malformed("no hash".into()).is_fatal());
        assert!(!StreamError::Cancelled.is_fatal());
        assert!(!StreamError::Cancelled.is_transient());
    }
}
