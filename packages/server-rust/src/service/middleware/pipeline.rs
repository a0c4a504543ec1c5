//! Pipeline composition: combines every stage into a single service stack.

use std::time::Duration;

use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::admission::AdmissionLayer;
use super::cache_invalidation::CacheInvalidationLayer;
use super::logging::LoggingLayer;
use super::performance::PerformanceLayer;
use super::timeout::TimeoutLayer;
use super::transaction::TransactionLayer;
use super::validation::ValidationLayer;
use crate::cache::Cache;
use crate::service::config::PipelineConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::router::OperationRouter;

/// The composed stage chain, cloneable and shareable across tasks.
pub type OperationPipeline = BoxCloneSyncService<Operation, OperationResponse, OperationError>;

/// Build the operation pipeline by wrapping the `OperationRouter` with every stage.
///
/// Layer order (outermost to innermost):
/// 1. `LoggingLayer` -- total latency and outcome of everything below
/// 2. `PerformanceLayer` -- duration histogram, slow-request flagging
/// 3. `AdmissionLayer` -- reject when the pipeline is full, before any work
/// 4. `TimeoutLayer` -- per-operation deadline, cancels and waits for unwind
/// 5. `ValidationLayer` -- reject invalid requests with zero side effects
/// 6. `CacheInvalidationLayer` -- evict declared patterns after a successful commit
/// 7. `TransactionLayer` -- begin/commit/rollback around the handler
///
/// The order is fixed here and identical for every request type.
#[must_use]
pub fn build_operation_pipeline(
    router: OperationRouter,
    config: &PipelineConfig,
    cache: Cache,
) -> OperationPipeline {
    let service = ServiceBuilder::new()
        .layer(LoggingLayer)
        .layer(PerformanceLayer::new(Duration::from_millis(
            config.slow_request_threshold_ms,
        )))
        .layer(AdmissionLayer::new(config.max_concurrent_operations))
        .layer(TimeoutLayer)
        .layer(ValidationLayer)
        .layer(CacheInvalidationLayer::new(cache))
        .layer(TransactionLayer)
        .service(router);
    BoxCloneSyncService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
