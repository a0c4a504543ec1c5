//! Periodic purge of expired cache entries.
//!
//! Expired entries are already invisible to readers; sweeping only reclaims
//! memory held by keys nobody reads again. Live keys are evicted through
//! `Cache::invalidate`, never from here, so the fill epoch stays authoritative.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::MemoryCache;

/// Handle to the background task sweeping a [`MemoryCache`].
///
/// Dropping the handle stops the task without waiting for it.
pub struct CacheSweeper {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl CacheSweeper {
    /// Spawn the sweeper. The first sweep runs one interval after start.
    ///
    /// # Errors
    ///
    /// Returns an error if `every` is zero.
    pub fn start(cache: Arc<MemoryCache>, every: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!every.is_zero(), "cache sweep interval must be positive");

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticks.tick().await;

            let mut purged = 0_u64;
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticks.tick() => purged += sweep(&cache),
                }
            }
            info!(purged, "cache sweeper stopped");
            purged
        });

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the sweeper and wait for it. Returns how many entries it purged
    /// over its lifetime; a second call returns 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweeper task panicked.
    pub async fn stop(&mut self) -> anyhow::Result<u64> {
        self.shutdown.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.context("cache sweeper task failed"),
            None => Ok(0),
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn sweep(cache: &MemoryCache) -> u64 {
    let removed = cache.purge_expired();
    if removed > 0 {
        debug!(removed, remaining = cache.len(), "purged expired cache entries");
    }
    removed as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
