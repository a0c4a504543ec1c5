//! projectdesk server: request pipeline with transactional cache invalidation.
//!
//! Requests enter through [`RequestDispatcher::execute`] and pass the stage
//! chain (logging, performance, validation, cache invalidation, transaction)
//! before reaching their handler. [`storage`] and [`cache`] hold the consumed
//! interfaces and their in-memory implementations.

pub mod cache;
pub mod service;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;

pub use cache::{Cache, CacheService, MemoryCache};
pub use service::{DispatchError, ExecuteOptions, HandlerRegistry, PipelineConfig, RequestDispatcher};
pub use storage::{MemoryStore, Repository, UnitOfWork, UnitOfWorkFactory};

/// A dispatcher over the sample domain with its in-memory collaborators.
pub struct InMemoryBackend {
    pub dispatcher: Arc<RequestDispatcher>,
    pub store: MemoryStore,
    pub cache: Arc<MemoryCache>,
}

/// Build an [`InMemoryBackend`] with every domain handler registered.
///
/// # Errors
///
/// Returns an error if domain registration fails.
pub fn in_memory_backend(config: PipelineConfig) -> anyhow::Result<InMemoryBackend> {
    let mut registry = HandlerRegistry::new();
    service::domain::register_all(&mut registry, &config)?;

    let store = MemoryStore::new();
    let cache = Arc::new(MemoryCache::new());
    let dispatcher = RequestDispatcher::new(
        registry,
        Arc::new(store.clone()),
        Cache::new(cache.clone()),
        config,
    );
    Ok(InMemoryBackend {
        dispatcher: Arc::new(dispatcher),
        store,
        cache,
    })
}
