//! Typed request handlers and their type-erased adapter.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use projectdesk_core::{Entity, Request, RequestContext, Response};
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::service::operation::{OperationContext, OperationResponse};
use crate::storage::{EntityRepository, UnitOfWork};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// Business logic for one request type.
///
/// Expected business outcomes (not found, conflicts) are returned as
/// `Response::Failure`. An `Err` is a fault: the transaction stage rolls
/// back and the caller sees an internal error.
#[async_trait]
pub trait Handler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, request: &R, ctx: &HandlerContext) -> anyhow::Result<Response<R::Output>>;
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// What a handler may touch while serving one request.
#[derive(Clone)]
pub struct HandlerContext {
    call_id: u64,
    request: RequestContext,
    cancellation: CancellationToken,
    uow: Arc<dyn UnitOfWork>,
    cache: Cache,
}

impl HandlerContext {
    pub(crate) fn from_operation(ctx: &OperationContext) -> Self {
        Self {
            call_id: ctx.call_id,
            request: ctx.request.clone(),
            cancellation: ctx.cancellation.clone(),
            uow: Arc::clone(&ctx.uow),
            cache: ctx.cache.clone(),
        }
    }

    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        self.request.actor.as_deref()
    }

    #[must_use]
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Repository for aggregate `T` bound to this request's unit of work.
    #[must_use]
    pub fn repository<T: Entity>(&self) -> EntityRepository<T> {
        EntityRepository::new(Arc::clone(&self.uow))
    }

    #[must_use]
    pub fn unit_of_work(&self) -> &Arc<dyn UnitOfWork> {
        &self.uow
    }

    /// Flush tracked changes into the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit of work rejects the flush.
    pub async fn save_changes(&self) -> anyhow::Result<usize> {
        self.uow.save_changes().await
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn handle(
        &self,
        payload: &(dyn Any + Send + Sync),
        ctx: &HandlerContext,
    ) -> anyhow::Result<OperationResponse>;
}

pub(crate) struct TypedHandler<R, H> {
    handler: H,
    _request: PhantomData<fn() -> R>,
}

impl<R, H> TypedHandler<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R, H> ErasedHandler for TypedHandler<R, H>
where
    R: Request,
    H: Handler<R>,
{
    async fn handle(
        &self,
        payload: &(dyn Any + Send + Sync),
        ctx: &HandlerContext,
    ) -> anyhow::Result<OperationResponse> {
        let request = payload
            .downcast_ref::<R>()
            .ok_or_else(|| anyhow::anyhow!("payload is not a {}", R::NAME))?;
        Ok(match self.handler.handle(request, ctx).await? {
            Response::Success(output) => OperationResponse::Success(Box::new(output)),
            Response::Failure(failure) => OperationResponse::Failure(failure),
        })
    }
}
