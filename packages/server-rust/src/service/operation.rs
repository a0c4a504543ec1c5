//! The type-erased operation envelope that flows through the stage chain.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use projectdesk_core::{Failure, RequestContext, RequestKind};
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::service::registry::Registration;
use crate::storage::{StoreError, UnitOfWork};

/// The typed request, shared so post-processing stages can still read it
/// after the handler has run.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The handler's success value, downcast back by the dispatcher.
pub type Output = Box<dyn Any + Send>;

/// Context carried with every operation through the pipeline.
#[derive(Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub request_name: &'static str,
    pub kind: RequestKind,
    pub request: RequestContext,
    pub cancellation: CancellationToken,
    pub call_timeout_ms: u64,
    /// Unit of work scoped to this operation.
    pub uow: Arc<dyn UnitOfWork>,
    pub cache: Cache,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("call_id", &self.call_id)
            .field("request_name", &self.request_name)
            .field("kind", &self.kind)
            .field("request", &self.request)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("call_timeout_ms", &self.call_timeout_ms)
            .finish_non_exhaustive()
    }
}

/// A request on its way through the stage chain.
pub struct Operation {
    ctx: OperationContext,
    payload: Payload,
    registration: Arc<Registration>,
}

impl Operation {
    #[must_use]
    pub fn new(ctx: OperationContext, payload: Payload, registration: Arc<Registration>) -> Self {
        Self {
            ctx,
            payload,
            registration,
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        &self.ctx
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    #[must_use]
    pub fn into_parts(self) -> (OperationContext, Payload, Arc<Registration>) {
        (self.ctx, self.payload, self.registration)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Non-fault outcome of an operation.
pub enum OperationResponse {
    Success(Output),
    Failure(Failure),
}

impl OperationResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
        }
    }
}

impl fmt::Debug for OperationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => f.write_str("Success(..)"),
            Self::Failure(failure) => f.debug_tuple("Failure").field(failure).finish(),
        }
    }
}

/// Faults raised inside the pipeline. Business failures never use this type.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl OperationError {
    /// Outcome label for logs. Only `Internal` is a fault.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Overloaded => "overloaded",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "fault",
        }
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Cancelled) => Self::Cancelled,
            _ => Self::Internal(err),
        }
    }
}
