//! Fluent builder for [`SubscriptionManager`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainstream_core::{InMemoryChain, SubscriptionManagerBuilder};
//!
//! let manager = SubscriptionManagerBuilder::new()
//!     .poll_interval_ms(1_000)
//!     .channel_capacity(8)
//!     .block_limit(1_000)
//!     .build(Arc::new(InMemoryChain::with_tip(100, 2)))
//!     .unwrap();
//! ```

use std::sync::Arc;

use crate::client::ChainClient;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::subscription::SubscriptionManager;
use crate::tip_cache::RefreshPolicy;

#[derive(Default)]
pub struct SubscriptionManagerBuilder {
    config: StreamConfig,
    refresh_policy: Option<Box<dyn RefreshPolicy>>,
}

impl SubscriptionManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: StreamConfig) -> Self {
        Self {
            config,
            refresh_policy: None,
        }
    }

    /// Set the tick interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set how many items a subscription buffers ahead of its consumer.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn error_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.error_channel_capacity = capacity;
        self
    }

    /// Set the number of remote calls allowed in flight across all subscriptions.
    pub fn max_in_flight_requests(mut self, n: usize) -> Self {
        self.config.max_in_flight_requests = n;
        self
    }

    /// Set the offset added to the tip to get a transaction's block limit.
    pub fn block_limit(mut self, offset: u64) -> Self {
        self.config.block_limit = offset;
        self
    }

    pub fn tip_cache_max_age_ms(mut self, ms: u64) -> Self {
        self.config.tip_cache_max_age_ms = ms;
        self
    }

    /// Replace the default age-based tip cache refresh.
    pub fn refresh_policy(mut self, policy: impl RefreshPolicy + 'static) -> Self {
        self.refresh_policy = Some(Box::new(policy));
        self
    }

    /// The configuration built so far.
    pub fn build_config(&self) -> StreamConfig {
        self.config.clone()
    }

    pub fn build(self, client: Arc<dyn ChainClient>) -> Result<SubscriptionManager, StreamError> {
        match self.refresh_policy {
            Some(policy) => SubscriptionManager::with_refresh_policy(client, self.config, policy),
            None => SubscriptionManager::new(client, self.config),
        }
    }
}
