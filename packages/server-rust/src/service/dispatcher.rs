//! The single entry point: `execute(request) -> Response`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use projectdesk_core::{Request, RequestContext, Response};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::error;

use super::config::PipelineConfig;
use super::middleware::{build_operation_pipeline, OperationPipeline};
use super::operation::{Operation, OperationContext, OperationError, OperationResponse};
use super::registry::HandlerRegistry;
use super::router::OperationRouter;
use crate::cache::Cache;
use crate::storage::UnitOfWorkFactory;

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Faults surfaced to callers. Internal causes are logged, never exposed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for '{name}'")]
    UnregisteredHandler { name: &'static str },
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error (call {call_id})")]
    Internal { call_id: u64 },
}

impl DispatchError {
    fn from_operation(err: OperationError, call_id: u64) -> Self {
        match err {
            OperationError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            OperationError::Overloaded => Self::Overloaded,
            OperationError::Cancelled => Self::Cancelled,
            OperationError::Internal(_) => Self::Internal { call_id },
        }
    }
}

// ---------------------------------------------------------------------------
// ExecuteOptions
// ---------------------------------------------------------------------------

/// Per-call overrides for [`RequestDispatcher::execute_with`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Caller identity and tracing data.
    pub context: RequestContext,
    /// Parent cancellation signal. The operation runs under a child token, so
    /// a timeout never cancels the caller's token.
    pub cancellation: Option<CancellationToken>,
    /// Overrides `PipelineConfig::default_operation_timeout_ms`.
    pub timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// RequestDispatcher
// ---------------------------------------------------------------------------

/// Resolves a request's registration by exact type, opens a unit of work and
/// drives the operation through the pipeline.
///
/// The returned response reflects committed store effects and completed cache
/// evictions; nothing is left running in the background.
pub struct RequestDispatcher {
    registry: Arc<HandlerRegistry>,
    units: Arc<dyn UnitOfWorkFactory>,
    cache: Cache,
    pipeline: OperationPipeline,
    config: PipelineConfig,
    next_call_id: AtomicU64,
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(
        registry: HandlerRegistry,
        units: Arc<dyn UnitOfWorkFactory>,
        cache: Cache,
        config: PipelineConfig,
    ) -> Self {
        let pipeline = build_operation_pipeline(OperationRouter::new(), &config, cache.clone());
        Self {
            registry: Arc::new(registry),
            units,
            cache,
            pipeline,
            config,
            next_call_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute `request` with an anonymous context and the default timeout.
    ///
    /// # Errors
    ///
    /// See [`RequestDispatcher::execute_with`].
    pub async fn execute<R: Request>(&self, request: R) -> Result<Response<R::Output>, DispatchError> {
        self.execute_with(request, ExecuteOptions::default()).await
    }

    /// Execute `request` through the full stage chain.
    ///
    /// Business outcomes (validation, not found, conflict) come back as
    /// `Ok(Response::Failure)`.
    ///
    /// # Errors
    ///
    /// - `UnregisteredHandler` if `R` has no registration. Nothing runs.
    /// - `Timeout`, `Overloaded` or `Cancelled` from the corresponding stages.
    /// - `Internal` for any other fault; details go to the log under `call_id`.
    pub async fn execute_with<R: Request>(
        &self,
        request: R,
        options: ExecuteOptions,
    ) -> Result<Response<R::Output>, DispatchError> {
        let Some(registration) = self.registry.get::<R>() else {
            return Err(DispatchError::UnregisteredHandler { name: R::NAME });
        };

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let cancellation = options
            .cancellation
            .map_or_else(CancellationToken::new, |parent| parent.child_token());
        let call_timeout_ms = options.timeout.map_or(self.config.default_operation_timeout_ms, |t| {
            u64::try_from(t.as_millis()).unwrap_or(u64::MAX)
        });

        let ctx = OperationContext {
            call_id,
            request_name: R::NAME,
            kind: registration.kind(),
            request: options.context,
            uow: self.units.create(cancellation.clone()),
            cancellation,
            call_timeout_ms,
            cache: self.cache.clone(),
        };
        let op = Operation::new(ctx, Arc::new(request), registration);

        match self.pipeline.clone().oneshot(op).await {
            Ok(OperationResponse::Success(output)) => match output.downcast::<R::Output>() {
                Ok(output) => Ok(Response::Success(*output)),
                Err(_) => {
                    error!(request = R::NAME, call_id, "handler produced an unexpected output type");
                    Err(DispatchError::Internal { call_id })
                }
            },
            Ok(OperationResponse::Failure(failure)) => Ok(Response::Failure(failure)),
            Err(err) => Err(DispatchError::from_operation(err, call_id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
