//! Fixtures shared by the service-layer unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use projectdesk_core::{
    CacheKey, CachePattern, Command, Failure, Query, Request, RequestContext, Response, RuleSet,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::cache::{Cache, MemoryCache};
use crate::service::handler::{Handler, HandlerContext};
use crate::service::operation::{Operation, OperationContext, OperationError, OperationResponse};
use crate::service::registry::{CommandRegistration, HandlerRegistry, QueryRegistration};
use crate::storage::{Change, MemoryStore, UnitOfWork};

pub(crate) const THINGS: &str = "things";

pub(crate) struct Rename {
    pub id: u32,
    pub name: String,
}

impl Request for Rename {
    type Output = u32;
    const NAME: &'static str = "Rename";
}
impl Command for Rename {}

pub(crate) struct Lookup {
    pub id: u32,
}

impl Request for Lookup {
    type Output = String;
    const NAME: &'static str = "Lookup";
}
impl Query for Lookup {}

/// Writes one row, then answers according to the requested name.
pub(crate) struct Echo;

#[async_trait]
impl Handler<Rename> for Echo {
    async fn handle(&self, request: &Rename, ctx: &HandlerContext) -> anyhow::Result<Response<u32>> {
        ctx.unit_of_work().track(Change::Insert {
            table: THINGS,
            id: request.id.to_string(),
            row: json!({ "name": request.name }),
        });
        ctx.save_changes().await?;
        match request.name.as_str() {
            "conflict" => Ok(Failure::conflict("name is taken").into()),
            "fault" => Err(anyhow::anyhow!("disk on fire")),
            "hang" => std::future::pending().await,
            _ => Ok(Response::Success(request.id)),
        }
    }
}

#[async_trait]
impl Handler<Lookup> for Echo {
    async fn handle(&self, request: &Lookup, _ctx: &HandlerContext) -> anyhow::Result<Response<String>> {
        Ok(Response::Success(format!("thing-{}", request.id)))
    }
}

pub(crate) fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_command(
            CommandRegistration::<Rename>::new(Echo)
                .rules(
                    RuleSet::<Rename>::new()
                        .required("name", |r| Some(r.name.as_str()))
                        .length("name", |r| Some(r.name.as_str()), 1, 20),
                )
                .invalidates(|_req, id| {
                    vec![
                        CachePattern::exact(CacheKey::entity(THINGS, id)),
                        CachePattern::all_lists(THINGS),
                    ]
                }),
        )
        .unwrap();
    registry
        .register_query(QueryRegistration::<Lookup>::new(Echo))
        .unwrap();
    registry
}

/// Store, cache and registry for building operations by hand.
pub(crate) struct Harness {
    pub store: MemoryStore,
    pub memory: Arc<MemoryCache>,
    pub cache: Cache,
    pub registry: HandlerRegistry,
}

impl Harness {
    pub fn new() -> Self {
        let memory = Arc::new(MemoryCache::new());
        Self {
            store: MemoryStore::new(),
            cache: Cache::new(memory.clone()),
            memory,
            registry: registry(),
        }
    }

    pub fn operation<R: Request>(&self, request: R) -> Operation {
        self.operation_with(request, CancellationToken::new(), 5_000)
    }

    pub fn operation_with<R: Request>(
        &self,
        request: R,
        cancellation: CancellationToken,
        call_timeout_ms: u64,
    ) -> Operation {
        let registration = self.registry.get::<R>().unwrap();
        let uow: Arc<dyn UnitOfWork> = Arc::new(self.store.unit_of_work(cancellation.clone()));
        let ctx = OperationContext {
            call_id: 1,
            request_name: R::NAME,
            kind: registration.kind(),
            request: RequestContext::for_actor("tester"),
            cancellation,
            call_timeout_ms,
            uow,
            cache: self.cache.clone(),
        };
        Operation::new(ctx, Arc::new(request), registration)
    }

    /// Seeds `things:{id}` and a list page so evictions are observable.
    pub async fn warm(&self, id: u32) {
        use crate::cache::CacheService;
        let ttl = Duration::from_secs(60);
        self.memory
            .set(CacheKey::entity(THINGS, id).as_str(), "x".into(), ttl)
            .await
            .unwrap();
        self.memory
            .set(CacheKey::list(THINGS, 1, 20, "all").as_str(), "x".into(), ttl)
            .await
            .unwrap();
    }
}

/// What [`StubService`] answers with.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Outcome {
    Success,
    Failure,
    Fault,
    /// Succeeds after sleeping.
    Delay(u64),
}

/// Inner service standing in for the rest of the chain.
///
/// With `writes` set it tracks and saves one row on the operation's unit of
/// work before answering, as a handler would.
#[derive(Clone)]
pub(crate) struct StubService {
    pub outcome: Outcome,
    pub writes: bool,
    pub calls: Arc<AtomicU32>,
}

impl StubService {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            writes: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn writing(outcome: Outcome) -> Self {
        Self {
            writes: true,
            ..Self::new(outcome)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Service<Operation> for StubService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome;
        let writes = self.writes;
        Box::pin(async move {
            if writes {
                let uow = &op.ctx().uow;
                uow.track(Change::Insert {
                    table: THINGS,
                    id: op.ctx().call_id.to_string(),
                    row: json!({ "by": "stub" }),
                });
                uow.save_changes().await?;
            }
            match outcome {
                Outcome::Success => Ok(OperationResponse::Success(Box::new(7_u32))),
                Outcome::Failure => Ok(OperationResponse::Failure(Failure::conflict("stub conflict"))),
                Outcome::Fault => Err(OperationError::Internal(anyhow::anyhow!("stub fault"))),
                Outcome::Delay(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(OperationResponse::Success(Box::new(7_u32)))
                }
            }
        })
    }
}

/// Dispatcher over the full sample domain with in-memory collaborators.
pub(crate) struct DomainHarness {
    pub store: MemoryStore,
    pub memory: Arc<MemoryCache>,
    pub dispatcher: crate::service::dispatcher::RequestDispatcher,
}

impl DomainHarness {
    pub fn new() -> Self {
        let config = crate::service::config::PipelineConfig::default();
        let mut registry = HandlerRegistry::new();
        crate::service::domain::register_all(&mut registry, &config).unwrap();
        let store = MemoryStore::new();
        let memory = Arc::new(MemoryCache::new());
        let dispatcher = crate::service::dispatcher::RequestDispatcher::new(
            registry,
            Arc::new(store.clone()),
            Cache::new(memory.clone()),
            config,
        );
        Self {
            store,
            memory,
            dispatcher,
        }
    }
}
