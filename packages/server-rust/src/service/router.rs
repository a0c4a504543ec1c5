//! Terminal service: hands the operation to its registered handler.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;

use super::handler::HandlerContext;
use super::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Innermost service of the pipeline.
///
/// The dispatcher has already resolved the handler by request type and
/// attached it to the operation, so routing is a direct call. The handler
/// races the operation's cancellation signal; a cancelled handler future is
/// dropped at its next suspension point and the operation fails with
/// `OperationError::Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct OperationRouter;

impl OperationRouter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Service<Operation> for OperationRouter {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        Box::pin(async move {
            let (ctx, payload, registration) = op.into_parts();
            let handler_ctx = HandlerContext::from_operation(&ctx);
            tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => Err(OperationError::Cancelled),
                result = registration.handler().handle(payload.as_ref(), &handler_ctx) => {
                    result.map_err(OperationError::from)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
