//! Transport-level error types.

use chainstream_core::StreamError;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while exchanging a JSON-RPC message with a node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be delivered or the connection dropped.
    #[error("transport error: {0}")]
    Connection(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The response deserialized but carries an invalid value.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Returns `true` if sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout { .. } | Self::Rpc(_)
        )
    }
}

impl From<TransportError> for StreamError {
    fn from(e: TransportError) -> Self {
        if e.is_retryable() {
            StreamError::Transient(e.to_string())
        } else {
            StreamError::Malformed(e.to_string())
        }
    }
}
