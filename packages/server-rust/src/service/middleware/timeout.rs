//! Per-operation deadline.
//!
//! On expiry the stage fires the operation's cancellation signal and then
//! keeps polling the inner chain until it unwinds. Inner stages therefore
//! still roll back and skip invalidation before the caller sees
//! `OperationError::Timeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Reads the deadline from each operation's `call_timeout_ms`.
#[derive(Debug, Clone, Default)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Operation> for TimeoutService<S>
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
        let timeout_ms = op.ctx().call_timeout_ms;
        let cancellation = op.ctx().cancellation.clone();
        let request = op.ctx().request_name;
        let mut fut = Box::pin(self.inner.call(op));

        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    warn!(request, timeout_ms, "deadline expired, cancelling");
                    cancellation.cancel();
                    match fut.await {
                        Err(OperationError::Cancelled) => Err(OperationError::Timeout { timeout_ms }),
                        // Finished before observing the signal.
                        finished => finished,
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
