//! Distributed cache abstraction.
//!
//! - [`CacheService`]: key-value store with TTL and glob eviction
//! - [`MemoryCache`]: `DashMap`-backed implementation
//! - [`Cache`]: typed read-through helper and invalidation entry point shared
//!   by handlers and the cache invalidation stage

pub mod coordinator;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use coordinator::Cache;
pub use memory::MemoryCache;

/// Key-value cache with per-entry TTL.
///
/// Implementations must be safe to share across tasks without client-side
/// locking; atomicity of individual key operations is the server's job.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Returns the value stored at `key`, or `None` on a miss or expired entry.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

    /// Stores `value` at `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> anyhow::Result<()>;

    /// Removes `key`. Returns whether an entry was present.
    async fn remove(&self, key: &str) -> anyhow::Result<bool>;

    /// Removes every key matching the glob `pattern`. Returns the number removed.
    /// Matching nothing is not an error.
    async fn remove_by_pattern(&self, pattern: &str) -> anyhow::Result<usize>;
}
