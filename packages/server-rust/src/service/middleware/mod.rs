//! Tower stages of the request pipeline.
//!
//! - [`logging`]: `request` span with outcome and total latency
//! - [`performance`]: duration histogram and slow-request flagging
//! - [`admission`]: in-flight cap, rejects with `Overloaded`
//! - [`timeout`]: per-operation deadline with cooperative cancellation
//! - [`validation`]: registered rule sets, short-circuits with every violation
//! - [`cache_invalidation`]: evict-after-commit for mutating requests
//! - [`transaction`]: unit-of-work boundary for mutating requests
//! - [`pipeline`]: composes every stage into a single service stack

pub mod admission;
pub mod cache_invalidation;
pub mod logging;
pub mod performance;
pub mod pipeline;
pub mod timeout;
pub mod transaction;
pub mod validation;

pub use admission::AdmissionLayer;
pub use cache_invalidation::CacheInvalidationLayer;
pub use logging::LoggingLayer;
pub use performance::PerformanceLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;
pub use transaction::TransactionLayer;
pub use validation::ValidationLayer;
