//! Rule-set evaluation before anything can have a side effect.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use projectdesk_core::{Failure, ValidationResult};
use tower::{Layer, Service};
use tracing::debug;

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// ValidationLayer
// ---------------------------------------------------------------------------

/// Runs the request type's registered rules.
///
/// A request that violates any rule never reaches the inner chain: the
/// operation completes with a validation `Failure` listing every violation,
/// and no store or cache call is made.
#[derive(Debug, Clone, Default)]
pub struct ValidationLayer;

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService { inner }
    }
}

// ---------------------------------------------------------------------------
// ValidationService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ValidationService<S> {
    inner: S,
}

impl<S> Service<Operation> for ValidationService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        match op.registration().validate(&**op.payload()) {
            Ok(ValidationResult::Valid) => Box::pin(self.inner.call(op)),
            Ok(ValidationResult::Invalid { errors }) => {
                debug!(
                    request = op.ctx().request_name,
                    call_id = op.ctx().call_id,
                    violations = errors.len(),
                    "validation rejected request"
                );
                Box::pin(async move { Ok(OperationResponse::Failure(Failure::validation(errors))) })
            }
            Err(err) => Box::pin(async move { Err(OperationError::Internal(err)) }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
