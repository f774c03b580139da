//! Subscription manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Settings shared by every subscription of one manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Tick interval in milliseconds. Defaults to the node's block time.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Items buffered per subscription before the walker waits for the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Errors buffered per subscription; further errors are logged and dropped.
    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,
    /// Remote calls in flight at once, across all subscriptions.
    #[serde(default = "default_max_in_flight_requests")]
    pub max_in_flight_requests: usize,
    /// Blocks added to the tip to get the block limit of a new transaction.
    #[serde(default = "default_block_limit")]
    pub block_limit: u64,
    /// How stale the cached tip may get before it is re-read.
    #[serde(default = "default_tip_cache_max_age_ms")]
    pub tip_cache_max_age_ms: u64,
}

fn default_poll_interval_ms() -> u64 { 15_000 }
fn default_channel_capacity() -> usize { 1 }
fn default_error_channel_capacity() -> usize { 64 }
fn default_max_in_flight_requests() -> usize { 16 }
fn default_block_limit() -> u64 { 500 }
fn default_tip_cache_max_age_ms() -> u64 { 1_000 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
            error_channel_capacity: default_error_channel_capacity(),
            max_in_flight_requests: default_max_in_flight_requests(),
            block_limit: default_block_limit(),
            tip_cache_max_age_ms: default_tip_cache_max_age_ms(),
        }
    }
}

impl StreamConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        let zero = [
            ("poll_interval_ms", self.poll_interval_ms == 0),
            ("channel_capacity", self.channel_capacity == 0),
            ("error_channel_capacity", self.error_channel_capacity == 0),
            ("max_in_flight_requests", self.max_in_flight_requests == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(StreamError::Config(format!("{field} must be greater than zero"))),
            None => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tip_cache_max_age(&self) -> Duration {
        Duration::from_millis(self.tip_cache_max_age_ms)
    }
}
