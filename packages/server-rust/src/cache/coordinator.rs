//! Typed cache access shared by query handlers and the invalidation stage.
//!
//! Values are encoded with `rmp-serde`. Reads go through
//! [`Cache::get_or_load`] (cache-aside); writes never touch the cache
//! directly, they only evict through [`Cache::invalidate`].
//!
//! # Fill races
//!
//! A reader that misses, loads a pre-commit image from the store and then
//! writes it back after the writer's eviction would leave stale data cached
//! until the TTL expires. Every invalidation bumps an epoch *before* evicting;
//! a fill compares the epoch it started with before and after writing, skips
//! the write if it moved, and removes its own write if it moved in between.
//! The epoch is process-wide, so a concurrent invalidation of any key makes an
//! in-flight fill skip caching. That costs an extra miss, never correctness.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use projectdesk_core::{CacheKey, CachePattern, CacheTtl};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::CacheService;

/// Shared cache handle. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    service: Arc<dyn CacheService>,
    epoch: Arc<AtomicU64>,
}

impl Cache {
    #[must_use]
    pub fn new(service: Arc<dyn CacheService>) -> Self {
        Self {
            service,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<dyn CacheService> {
        &self.service
    }

    /// Number of invalidations issued through this handle.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Reads and decodes `key`. Undecodable entries are dropped and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache service fails.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> anyhow::Result<Option<T>> {
        let Some(bytes) = self.service.get(key.as_str()).await? else {
            return Ok(None);
        };
        match rmp_serde::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key = %key, error = %err, "dropping undecodable cache entry");
                self.service.remove(key.as_str()).await?;
                Ok(None)
            }
        }
    }

    /// Encodes and stores `value` under `key` for the TTL class.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the cache service fails.
    pub async fn set<T: Serialize + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: CacheTtl,
    ) -> anyhow::Result<()> {
        let bytes = rmp_serde::to_vec_named(value)?;
        self.service
            .set(key.as_str(), Bytes::from(bytes), ttl.duration())
            .await
    }

    /// Cache-aside read. On a miss, runs `load` and caches a `Some` result
    /// with `ttl` unless an invalidation raced with the load. `None` results
    /// are not cached.
    ///
    /// A failing cache read degrades to a plain store load without caching.
    ///
    /// # Errors
    ///
    /// Returns whatever `load` returns, or a cache error while undoing a
    /// raced fill.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: CacheTtl,
        load: F,
    ) -> anyhow::Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => {
                metrics::counter!("cache_hits_total").increment(1);
                debug!(key = %key, "cache hit");
                return Ok(Some(value));
            }
            Ok(None) => {
                metrics::counter!("cache_misses_total").increment(1);
                debug!(key = %key, "cache miss");
            }
            Err(err) => {
                warn!(key = %key, error = %format!("{err:#}"), "cache read failed, loading from store");
                return load().await;
            }
        }

        let started = self.epoch();
        let Some(value) = load().await? else {
            return Ok(None);
        };

        if self.epoch() != started {
            debug!(key = %key, "invalidation raced with load, not caching");
            return Ok(Some(value));
        }
        if let Err(err) = self.set(key, &value, ttl).await {
            warn!(key = %key, error = %format!("{err:#}"), "cache fill failed");
            return Ok(Some(value));
        }
        if self.epoch() != started {
            debug!(key = %key, "invalidation landed during fill, removing it");
            self.service.remove(key.as_str()).await?;
        }
        Ok(Some(value))
    }

    /// Evicts every pattern. Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns the first cache service error; later patterns are not attempted.
    pub async fn invalidate(&self, patterns: &[CachePattern]) -> anyhow::Result<usize> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let mut removed = 0;
        for pattern in patterns {
            removed += match pattern {
                CachePattern::Exact(key) => usize::from(self.service.remove(key.as_str()).await?),
                CachePattern::Glob(glob) => self.service.remove_by_pattern(glob).await?,
            };
        }
        metrics::counter!("cache_evictions_total").increment(removed as u64);
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
