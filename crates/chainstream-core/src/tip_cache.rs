//! Cached chain tip and the derived block limit used when building transactions.
//!
//! The block limit is `cached_tip + offset`. The cached tip is at most as stale
//! as the injected [`RefreshPolicy`] allows: when the policy asks for a refresh
//! the tip is re-read from the node, otherwise the cached value is used. Tips
//! observed by running streams are fed in through [`TipCache::observe`], and the
//! cached value never moves backwards.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::client::ChainClient;
use crate::error::StreamError;
use crate::types::BlockNumber;

/// Decides when the cached tip must be re-read from the node.
pub trait RefreshPolicy: Send + Sync {
    /// `age` is the time since the cached tip was last updated, `None` if nothing is cached.
    fn needs_refresh(&self, age: Option<Duration>) -> bool;
}

impl<P: RefreshPolicy + ?Sized> RefreshPolicy for Box<P> {
    fn needs_refresh(&self, age: Option<Duration>) -> bool {
        (**self).needs_refresh(age)
    }
}

/// Refresh once the cached tip is older than the given bound.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl RefreshPolicy for MaxAge {
    fn needs_refresh(&self, age: Option<Duration>) -> bool {
        age.map_or(true, |a| a >= self.0)
    }
}

/// Only read the node when nothing is cached; afterwards rely on observed tips.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedOnly;

impl RefreshPolicy for ObservedOnly {
    fn needs_refresh(&self, age: Option<Duration>) -> bool {
        age.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct Cached {
    tip: BlockNumber,
    updated_at: Instant,
}

/// Explicit, per-manager cache of the chain tip.
pub struct TipCache {
    client: Arc<dyn ChainClient>,
    offset: u64,
    policy: Box<dyn RefreshPolicy>,
    cached: Mutex<Option<Cached>>,
}

impl TipCache {
    pub fn new(
        client: Arc<dyn ChainClient>,
        offset: u64,
        policy: impl RefreshPolicy + 'static,
    ) -> Self {
        Self {
            client,
            offset,
            policy: Box::new(policy),
            cached: Mutex::new(None),
        }
    }

    /// The fixed offset added to the tip.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The cached tip without touching the node.
    pub fn cached_tip(&self) -> Option<BlockNumber> {
        self.lock().map(|c| c.tip)
    }

    /// Record a tip seen elsewhere. Lower values than the cached one are ignored.
    pub fn observe(&self, tip: BlockNumber) {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        match *cached {
            Some(c) if tip < c.tip => {}
            _ => {
                *cached = Some(Cached {
                    tip,
                    updated_at: Instant::now(),
                })
            }
        }
    }

    /// Current tip, refreshed from the node if the policy requires it.
    ///
    /// A failed refresh falls back to the cached value when there is one.
    pub async fn tip(&self) -> Result<BlockNumber, StreamError> {
        let cached = self.lock();
        if !self.policy.needs_refresh(cached.map(|c| c.updated_at.elapsed())) {
            if let Some(c) = cached {
                return Ok(c.tip);
            }
        }
        match self.client.get_latest_block_number().await {
            Ok(tip) => {
                self.observe(tip);
                Ok(self.cached_tip().unwrap_or(tip))
            }
            Err(e) => match cached {
                Some(c) => {
                    tracing::warn!(error = %e, cached = c.tip, "tip refresh failed, using cached tip");
                    Ok(c.tip)
                }
                None => Err(e),
            },
        }
    }

    /// `tip + offset`: the highest block number a transaction built now may target.
    pub async fn block_limit(&self) -> Result<BlockNumber, StreamError> {
        Ok(self.tip().await?.saturating_add(self.offset))
    }

    fn lock(&self) -> Option<Cached> {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}
