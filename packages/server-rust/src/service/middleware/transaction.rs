//! Transaction boundary around the handler for mutating requests.
//!
//! Begin, run the inner chain, commit on `Success`. A `Failure`, a fault or a
//! cancellation rolls back instead, and the original outcome is returned
//! unchanged. A unique key taken by a concurrent commit is reported as a
//! conflict. Queries pass straight through and never open a transaction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use projectdesk_core::Failure;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::storage::{StoreError, UnitOfWork};

// ---------------------------------------------------------------------------
// TransactionLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TransactionLayer;

impl<S> Layer<S> for TransactionLayer {
    type Service = TransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TransactionService { inner }
    }
}

// ---------------------------------------------------------------------------
// TransactionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransactionService<S> {
    inner: S,
}

impl<S> Service<Operation> for TransactionService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        if !op.ctx().kind.is_mutating() {
            return Box::pin(self.inner.call(op));
        }

        // The inner service is called only after `begin_transaction`, so take
        // the instance that was driven to readiness and leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let uow = Arc::clone(&op.ctx().uow);
            let cancellation = op.ctx().cancellation.clone();
            let request = op.ctx().request_name;
            let call_id = op.ctx().call_id;

            uow.begin_transaction().await?;
            debug!(request, call_id, "transaction started");

            match inner.call(op).await {
                Ok(OperationResponse::Success(output)) => {
                    if cancellation.is_cancelled() {
                        rollback(uow.as_ref(), request, call_id).await;
                        return Err(OperationError::Cancelled);
                    }
                    if let Err(err) = uow.commit().await {
                        rollback(uow.as_ref(), request, call_id).await;
                        if let Some(StoreError::DuplicateKey { table, id }) = err.downcast_ref::<StoreError>() {
                            debug!(request, call_id, table = *table, id = %id, "unique key taken at commit");
                            return Ok(OperationResponse::Failure(Failure::conflict(format!(
                                "{table} '{id}' already exists"
                            ))));
                        }
                        return Err(err.into());
                    }
                    debug!(request, call_id, "transaction committed");
                    Ok(OperationResponse::Success(output))
                }
                Ok(OperationResponse::Failure(failure)) => {
                    rollback(uow.as_ref(), request, call_id).await;
                    Ok(OperationResponse::Failure(failure))
                }
                Err(err) => {
                    rollback(uow.as_ref(), request, call_id).await;
                    Err(err)
                }
            }
        })
    }
}

/// Rolls back if a transaction is still open. A rollback error is logged and
/// never replaces the outcome that caused it.
async fn rollback(uow: &dyn UnitOfWork, request: &'static str, call_id: u64) {
    if !uow.in_transaction() {
        return;
    }
    match uow.rollback().await {
        Ok(()) => debug!(request, call_id, "transaction rolled back"),
        Err(err) => warn!(request, call_id, error = %format!("{err:#}"), "rollback failed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
