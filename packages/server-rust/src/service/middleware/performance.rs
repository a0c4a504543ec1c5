//! Latency measurement for everything inside the logging stage.
//!
//! Records `pipeline_request_duration_ms` for every operation and flags those
//! over the configured threshold as slow. Slow operations still complete
//! normally.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// PerformanceLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PerformanceLayer {
    threshold: Duration,
    slow: Arc<AtomicU64>,
}

impl PerformanceLayer {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            slow: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of operations flagged as slow since this layer was built.
    #[must_use]
    pub fn slow_requests(&self) -> u64 {
        self.slow.load(Ordering::Relaxed)
    }
}

impl<S> Layer<S> for PerformanceLayer {
    type Service = PerformanceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PerformanceService {
            inner,
            threshold: self.threshold,
            slow: Arc::clone(&self.slow),
        }
    }
}

// ---------------------------------------------------------------------------
// PerformanceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PerformanceService<S> {
    inner: S,
    threshold: Duration,
    slow: Arc<AtomicU64>,
}

impl<S> Service<Operation> for PerformanceService<S>
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
        let request = op.ctx().request_name;
        let call_id = op.ctx().call_id;
        let threshold = self.threshold;
        let slow = Arc::clone(&self.slow);
        let fut = self.inner.call(op);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let elapsed = start.elapsed();

            metrics::histogram!("pipeline_request_duration_ms", "request" => request)
                .record(elapsed.as_secs_f64() * 1000.0);

            if elapsed > threshold {
                slow.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pipeline_slow_requests_total", "request" => request).increment(1);
                #[allow(clippy::cast_possible_truncation)]
                let (elapsed_ms, threshold_ms) =
                    (elapsed.as_millis() as u64, threshold.as_millis() as u64);
                warn!(request, call_id, elapsed_ms, threshold_ms, "slow request");
            }

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
