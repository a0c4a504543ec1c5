//! Request execution framework.
//!
//! This module implements the request pipeline:
//!
//! 1. **Registry** (`registry`): request type -> handler, rule set, invalidation scope
//! 2. **Dispatch** (`dispatcher`): typed request -> `Operation` with its own unit of work
//! 3. **Middleware** (`middleware`): Tower stages (logging, performance, load shedding,
//!    timeout, validation, cache invalidation, transaction)
//! 4. **Routing** (`router`): hands the operation to its handler
//! 5. **Domain** (`domain`): projects, tasks and time entries
//! 6. **Cache sweeper** (`worker`): periodic purge of expired entries

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod handler;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenient access.
pub use config::PipelineConfig;
pub use dispatcher::{DispatchError, ExecuteOptions, RequestDispatcher};
pub use handler::{Handler, HandlerContext};
pub use operation::{Operation, OperationContext, OperationError, OperationResponse};
pub use registry::{CommandRegistration, HandlerRegistry, QueryRegistration, Registration, RegistryError};
pub use router::OperationRouter;
pub use worker::CacheSweeper;
