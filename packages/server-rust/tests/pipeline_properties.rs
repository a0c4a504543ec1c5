//! End-to-end properties of the request pipeline, observed through a spy
//! unit of work and a spy cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use parking_lot::Mutex;
use projectdesk_core::{Entity, FailureKind, Project, Response, TimeEntry};
use projectdesk_server::service::domain::projects::{
    create_project_rules, create_project_scope, update_project_rules, update_project_scope,
    CreateProjectHandler, GetProjectHandler,
};
use projectdesk_server::service::domain::{
    register_all, CreateProject, CreateTask, CreateTimeEntry, GetProject, GetTask, ListProjects,
    UpdateProject,
};
use projectdesk_server::service::{
    CommandRegistration, Handler, HandlerContext, QueryRegistration,
};
use projectdesk_server::storage::{Change, MemoryUnitOfWork, Row};
use projectdesk_server::{
    Cache, CacheService, DispatchError, ExecuteOptions, HandlerRegistry, MemoryCache, MemoryStore,
    PipelineConfig, Repository, RequestDispatcher, UnitOfWork, UnitOfWorkFactory,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Spies
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct UowCalls {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    saves: AtomicUsize,
    reads: AtomicUsize,
}

impl UowCalls {
    fn total(&self) -> usize {
        [&self.begins, &self.commits, &self.rollbacks, &self.saves, &self.reads]
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }
}

struct SpyUnitOfWork {
    inner: MemoryUnitOfWork,
    calls: Arc<UowCalls>,
}

#[async_trait]
impl UnitOfWork for SpyUnitOfWork {
    async fn begin_transaction(&self) -> anyhow::Result<()> {
        self.calls.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin_transaction().await
    }

    async fn commit(&self) -> anyhow::Result<()> {
        self.calls.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        self.calls.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }

    async fn save_changes(&self) -> anyhow::Result<usize> {
        self.calls.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_changes().await
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn track(&self, change: Change) {
        self.inner.track(change);
    }

    async fn find(&self, table: &'static str, id: &str) -> anyhow::Result<Option<Row>> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find(table, id).await
    }

    async fn scan(&self, table: &'static str) -> anyhow::Result<Vec<Row>> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(table).await
    }
}

struct SpyUnits {
    store: MemoryStore,
    calls: Arc<UowCalls>,
}

impl UnitOfWorkFactory for SpyUnits {
    fn create(&self, cancellation: CancellationToken) -> Arc<dyn UnitOfWork> {
        Arc::new(SpyUnitOfWork {
            inner: self.store.unit_of_work(cancellation),
            calls: Arc::clone(&self.calls),
        })
    }
}

/// Records every cache call as `"{op} {key}"`.
#[derive(Default)]
struct SpyCache {
    inner: MemoryCache,
    log: Mutex<Vec<String>>,
}

impl SpyCache {
    fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn evictions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("remove"))
            .collect()
    }

    fn clear_log(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl CacheService for SpyCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        self.log.lock().push(format!("get {key}"));
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> anyhow::Result<()> {
        self.log.lock().push(format!("set {key}"));
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<bool> {
        self.log.lock().push(format!("remove {key}"));
        self.inner.remove(key).await
    }

    async fn remove_by_pattern(&self, pattern: &str) -> anyhow::Result<usize> {
        self.log.lock().push(format!("remove_by_pattern {pattern}"));
        self.inner.remove_by_pattern(pattern).await
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

struct Env {
    store: MemoryStore,
    calls: Arc<UowCalls>,
    cache: Arc<SpyCache>,
    dispatcher: Arc<RequestDispatcher>,
}

impl Env {
    fn with_registry(registry: HandlerRegistry) -> Self {
        let store = MemoryStore::new();
        let calls = Arc::new(UowCalls::default());
        let cache = Arc::new(SpyCache::default());
        let units = SpyUnits {
            store: store.clone(),
            calls: Arc::clone(&calls),
        };
        let dispatcher = RequestDispatcher::new(
            registry,
            Arc::new(units),
            Cache::new(cache.clone()),
            PipelineConfig::default(),
        );
        Self {
            store,
            calls,
            cache,
            dispatcher: Arc::new(dispatcher),
        }
    }

    fn domain() -> Self {
        let mut registry = HandlerRegistry::new();
        register_all(&mut registry, &PipelineConfig::default()).unwrap();
        Self::with_registry(registry)
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn seed_apollo(&self) -> Project {
        self.dispatcher
            .execute(CreateProject {
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                ..CreateProject::new("APL", "Apollo")
            })
            .await
            .unwrap()
            .into_result()
            .unwrap()
    }
}

fn rename_apollo(name: &str) -> UpdateProject {
    UpdateProject {
        code: "APL".to_string(),
        name: Some(name.to_string()),
        ..UpdateProject::default()
    }
}

// ---------------------------------------------------------------------------
// Handlers used to inject faults
// ---------------------------------------------------------------------------

/// Writes the renamed project, then faults.
struct FaultAfterWrite;

#[async_trait]
impl Handler<UpdateProject> for FaultAfterWrite {
    async fn handle(&self, request: &UpdateProject, ctx: &HandlerContext) -> anyhow::Result<Response<Project>> {
        let projects = ctx.repository::<Project>();
        let mut project = projects.get_by_id(&request.code).await?.context("project was seeded")?;
        project.name = request.name.clone().unwrap_or_default();
        projects.update(&project)?;
        ctx.save_changes().await?;
        anyhow::bail!("downstream service unavailable")
    }
}

/// Writes the renamed project, then stalls.
struct StallAfterWrite;

#[async_trait]
impl Handler<UpdateProject> for StallAfterWrite {
    async fn handle(&self, request: &UpdateProject, ctx: &HandlerContext) -> anyhow::Result<Response<Project>> {
        let projects = ctx.repository::<Project>();
        let mut project = projects.get_by_id(&request.code).await?.context("project was seeded")?;
        project.name = request.name.clone().unwrap_or_default();
        projects.update(&project)?;
        ctx.save_changes().await?;
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(Response::Success(project))
    }
}

fn registry_with_update<H: Handler<UpdateProject>>(update: H) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_command(
            CommandRegistration::<CreateProject>::new(CreateProjectHandler)
                .rules(create_project_rules().unwrap())
                .invalidates(create_project_scope),
        )
        .unwrap();
    registry
        .register_command(
            CommandRegistration::<UpdateProject>::new(update)
                .rules(update_project_rules())
                .invalidates(update_project_scope),
        )
        .unwrap();
    registry
        .register_query(QueryRegistration::<GetProject>::new(GetProjectHandler))
        .unwrap();
    registry
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn business_failure_evicts_nothing_and_changes_nothing() {
    let env = Env::domain();
    let original = env.seed_apollo().await;
    env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    env.cache.clear_log();

    let resp = env.dispatcher.execute(CreateProject::new("APL", "Apollo again")).await.unwrap();

    assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::Conflict));
    assert!(env.cache.evictions().is_empty());
    assert_eq!(Env::count(&env.calls.rollbacks), 1);
    let stored: Project = serde_json::from_value(env.store.peek(Project::TABLE, "APL").unwrap()).unwrap();
    assert_eq!(stored, original);
}

#[tokio::test]
async fn success_evicts_every_mapped_pattern_before_returning() {
    let env = Env::domain();
    env.seed_apollo().await;
    env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    env.dispatcher.execute(ListProjects::default()).await.unwrap();
    assert!(env.cache.inner.contains("projects:APL"));
    env.cache.clear_log();

    env.dispatcher.execute(rename_apollo("Apollo II")).await.unwrap();

    assert_eq!(
        env.cache.evictions(),
        vec!["remove projects:APL".to_string(), "remove_by_pattern projects:list:*".to_string()]
    );
    assert!(env.cache.inner.is_empty());
}

#[tokio::test]
async fn queries_never_begin_a_transaction() {
    let env = Env::domain();

    env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    env.dispatcher.execute(ListProjects::default()).await.unwrap();

    assert_eq!(Env::count(&env.calls.begins), 0);
    assert_eq!(Env::count(&env.calls.commits), 0);
    assert_eq!(Env::count(&env.calls.rollbacks), 0);
}

#[tokio::test]
async fn remove_by_pattern_on_absent_keys_is_a_no_op() {
    let cache = MemoryCache::new();
    cache.set("tasks:1", Bytes::from_static(b"x"), Duration::from_secs(60)).await.unwrap();

    assert_eq!(cache.remove_by_pattern("projects:list:*").await.unwrap(), 0);
    assert_eq!(cache.remove_by_pattern("projects:*").await.unwrap(), 0);
    assert!(!cache.remove("projects:APL").await.unwrap());
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn validation_failure_makes_no_store_or_cache_calls() {
    let env = Env::domain();

    let resp = env
        .dispatcher
        .execute(CreateProject { budget: Some(-1.0), ..CreateProject::new("bad code", "") })
        .await
        .unwrap();

    let failure = resp.into_result().unwrap_err();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.messages.len(), 4);
    assert_eq!(env.calls.total(), 0);
    assert!(env.cache.calls().is_empty());
    assert_eq!(env.store.read_count(), 0);
}

#[tokio::test]
async fn unregistered_request_is_rejected() {
    let env = Env::with_registry(HandlerRegistry::new());
    let err = env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap_err();
    assert_eq!(err, DispatchError::UnregisteredHandler { name: "GetProject" });
    assert_eq!(env.calls.total(), 0);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_create_project_commits_once_and_evicts_lists() {
    let env = Env::domain();
    env.dispatcher.execute(ListProjects::default()).await.unwrap();
    assert!(env.cache.inner.contains("projects:list:page1:size20:all"));
    env.cache.clear_log();

    let resp = env.dispatcher.execute(CreateProject::new("APL", "Apollo")).await.unwrap();

    assert!(resp.is_success());
    assert_eq!(Env::count(&env.calls.commits), 1);
    assert!(env.cache.evictions().contains(&"remove_by_pattern projects:list:*".to_string()));
    assert!(!env.cache.inner.contains("projects:list:page1:size20:all"));
    assert!(!env.cache.inner.contains("projects:APL"));
}

#[tokio::test]
async fn scenario_faulting_update_leaves_store_and_cache_untouched() {
    let env = Env::with_registry(registry_with_update(FaultAfterWrite));
    let original = env.seed_apollo().await;
    env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    env.cache.clear_log();
    let saves_before = Env::count(&env.calls.saves);

    let err = env.dispatcher.execute(rename_apollo("Overwritten")).await.unwrap_err();

    assert!(matches!(err, DispatchError::Internal { .. }));
    assert!(!err.to_string().contains("downstream"));
    assert_eq!(Env::count(&env.calls.saves), saves_before + 1);
    assert_eq!(Env::count(&env.calls.rollbacks), 1);
    let stored: Project = serde_json::from_value(env.store.peek(Project::TABLE, "APL").unwrap()).unwrap();
    assert_eq!(stored, original);
    assert!(env.cache.evictions().is_empty());
    assert!(env.cache.inner.contains("projects:APL"));
}

#[tokio::test]
async fn scenario_concurrent_time_entries_both_commit() {
    let env = Env::domain();
    env.seed_apollo().await;
    let task = env
        .dispatcher
        .execute(CreateTask::new("APL", "Launch"))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    let spawn_entry = |user: &str| {
        let dispatcher = Arc::clone(&env.dispatcher);
        let request = CreateTimeEntry::new(task.id, 5.0, date).with_user(user);
        tokio::spawn(async move { dispatcher.execute(request).await })
    };
    let (a, b) = (spawn_entry("ana"), spawn_entry("bo"));
    let (a, b) = tokio::join!(a, b);
    assert!(a.unwrap().unwrap().is_success());
    assert!(b.unwrap().unwrap().is_success());

    assert_eq!(env.store.row_count(TimeEntry::TABLE), 2);
    let details = env
        .dispatcher
        .execute(GetTask { task_id: task.id })
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!((details.logged_hours - 10.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn scenario_read_through_repopulates_then_hits() {
    let env = Env::domain();
    env.seed_apollo().await;
    env.dispatcher.execute(rename_apollo("Apollo II")).await.unwrap();
    assert!(!env.cache.inner.contains("projects:APL"));

    let reads_before = env.store.read_count();
    let first = env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    let reads_after_miss = env.store.read_count();
    assert_eq!(reads_after_miss, reads_before + 1);
    let ttl = env.cache.inner.ttl_remaining("projects:APL").unwrap();
    assert!(ttl <= Duration::from_secs(15 * 60));
    assert!(ttl > Duration::from_secs(14 * 60));

    let second = env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    assert_eq!(env.store.read_count(), reads_after_miss);
    assert_eq!(first, second);
    assert_eq!(first.success().map(|p| p.name.as_str()), Some("Apollo II"));
}

#[tokio::test]
async fn cancelled_update_rolls_back_and_skips_invalidation() {
    let env = Env::with_registry(registry_with_update(StallAfterWrite));
    let original = env.seed_apollo().await;
    env.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
    env.cache.clear_log();

    let token = CancellationToken::new();
    let options = ExecuteOptions {
        cancellation: Some(token.clone()),
        ..ExecuteOptions::default()
    };
    let dispatcher = Arc::clone(&env.dispatcher);
    let call = tokio::spawn(async move { dispatcher.execute_with(rename_apollo("Stalled"), options).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, DispatchError::Cancelled);
    assert_eq!(Env::count(&env.calls.rollbacks), 1);
    let stored: Project = serde_json::from_value(env.store.peek(Project::TABLE, "APL").unwrap()).unwrap();
    assert_eq!(stored, original);
    assert!(env.cache.evictions().is_empty());
}
