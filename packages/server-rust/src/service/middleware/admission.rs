//! Admission control: caps how many operations are inside the pipeline.
//!
//! An operation that finds every slot taken is turned away before the
//! deadline starts, before validation and before any store or cache call, with
//! `OperationError::Overloaded`. Rejections are counted in
//! `pipeline_overloaded_total` (labelled by request and kind) and the number of
//! admitted operations is exported as the `pipeline_in_flight` gauge.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Slots {
    capacity: usize,
    in_flight: AtomicUsize,
    shed: AtomicU64,
}

impl Slots {
    fn try_admit(self: &Arc<Self>) -> Option<Ticket> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()?;
        metrics::gauge!("pipeline_in_flight").increment(1.0);
        Some(Ticket {
            slots: Arc::clone(self),
        })
    }
}

/// One admitted operation. The slot is returned when the ticket drops, which
/// also covers operations whose future is dropped mid-flight.
struct Ticket {
    slots: Arc<Slots>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.slots.in_flight.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!("pipeline_in_flight").decrement(1.0);
    }
}

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Every service built from one layer shares the same slots.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    slots: Arc<Slots>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            slots: Arc::new(Slots {
                capacity: max_in_flight as usize,
                in_flight: AtomicUsize::new(0),
                shed: AtomicU64::new(0),
            }),
        }
    }

    /// Operations currently admitted and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.in_flight.load(Ordering::Acquire)
    }

    /// Operations rejected since this layer was built.
    #[must_use]
    pub fn shed_count(&self) -> u64 {
        self.slots.shed.load(Ordering::Relaxed)
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            slots: Arc::clone(&self.slots),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    slots: Arc<Slots>,
}

impl<S> Service<Operation> for AdmissionService<S>
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
        let Some(ticket) = self.slots.try_admit() else {
            let shed = self.slots.shed.fetch_add(1, Ordering::Relaxed) + 1;
            let ctx = op.ctx();
            metrics::counter!(
                "pipeline_overloaded_total",
                "request" => ctx.request_name,
                "kind" => ctx.kind.as_str()
            )
            .increment(1);
            warn!(
                request = ctx.request_name,
                call_id = ctx.call_id,
                capacity = self.slots.capacity,
                shed,
                "pipeline at capacity, rejecting"
            );
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let fut = self.inner.call(op);
        Box::pin(async move {
            let _ticket = ticket;
            fut.await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
