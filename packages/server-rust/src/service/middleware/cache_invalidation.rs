//! Evict-after-commit for mutating requests.
//!
//! Sits outside the transaction stage, so by the time the inner chain returns
//! `Success` the write is committed. Only then are the request type's declared
//! patterns evicted. A `Failure` or fault from inside evicts nothing. The stage
//! never writes to the cache; the next read miss repopulates.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::{debug, error};

use crate::cache::Cache;
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// CacheInvalidationLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CacheInvalidationLayer {
    cache: Cache,
}

impl CacheInvalidationLayer {
    #[must_use]
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for CacheInvalidationLayer {
    type Service = CacheInvalidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheInvalidationService {
            inner,
            cache: self.cache.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CacheInvalidationService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CacheInvalidationService<S> {
    inner: S,
    cache: Cache,
}

impl<S> Service<Operation> for CacheInvalidationService<S>
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
        if !op.ctx().kind.is_mutating() {
            return Box::pin(self.inner.call(op));
        }

        let payload = Arc::clone(op.payload());
        let registration = Arc::clone(op.registration());
        let call_id = op.ctx().call_id;
        let cache = self.cache.clone();
        let fut = self.inner.call(op);

        Box::pin(async move {
            let response = fut.await?;
            let OperationResponse::Success(output) = &response else {
                return Ok(response);
            };

            let patterns = registration.invalidation_patterns(&*payload, &**output)?;
            if patterns.is_empty() {
                return Ok(response);
            }

            // The write is already committed; an eviction error is surfaced
            // rather than leaving stale entries behind silently.
            match cache.invalidate(&patterns).await {
                Ok(removed) => {
                    debug!(
                        request = registration.name(),
                        call_id,
                        patterns = patterns.len(),
                        removed,
                        "cache invalidated"
                    );
                    Ok(response)
                }
                Err(err) => {
                    error!(
                        request = registration.name(),
                        call_id,
                        error = %format!("{err:#}"),
                        "cache invalidation failed after commit"
                    );
                    Err(OperationError::Internal(err))
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
