//! Outermost stage: one `request` span per operation with total latency and
//! outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{error, info, info_span, warn, Instrument};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps each operation in a `request` span.
///
/// The span carries `request`, `kind` and `call_id` from the start and has
/// `outcome` and `duration_ms` recorded on completion. Outcomes are
/// `success`, `failure`, `overloaded`, `timeout`, `cancelled` and `fault`; only
/// a fault is logged at error level.
#[derive(Debug, Clone, Default)]
pub struct LoggingLayer;

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService { inner }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S> Service<Operation> for LoggingService<S>
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
        let ctx = op.ctx();
        let request = ctx.request_name;
        let call_id = ctx.call_id;
        let span = info_span!(
            "request",
            request = request,
            kind = ctx.kind.as_str(),
            call_id = call_id,
            actor = ctx.request.actor.as_deref(),
            trace_id = ctx.request.trace_id.as_deref(),
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let fut = span.in_scope(|| self.inner.call(op));

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = match &result {
                    Ok(response) => response.outcome(),
                    Err(err) => err.outcome(),
                };
                let span = tracing::Span::current();
                span.record("outcome", outcome);
                span.record("duration_ms", duration_ms);

                match &result {
                    Ok(OperationResponse::Success(_)) => {
                        info!(request, call_id, duration_ms, "request succeeded");
                    }
                    Ok(OperationResponse::Failure(failure)) => {
                        info!(
                            request,
                            call_id,
                            duration_ms,
                            kind = %failure.kind,
                            reason = %failure.reason(),
                            "request failed"
                        );
                    }
                    Err(err @ OperationError::Internal(_)) => {
                        error!(request, call_id, duration_ms, error = %err, "request faulted");
                    }
                    Err(err) => {
                        warn!(request, call_id, duration_ms, outcome, "request not completed: {err}");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
