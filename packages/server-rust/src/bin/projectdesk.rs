//! `projectdesk`: runs a scripted session through the request pipeline and
//! prints every response as JSON.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use projectdesk_core::{RequestContext, Response};
use projectdesk_server::service::domain::{
    ChangeTaskStatus, CreateProject, CreateTask, CreateTimeEntry, DeleteProject, GetProject,
    GetTask, ListProjects, ListTasksByProject, UpdateProject,
};
use projectdesk_server::service::CacheSweeper;
use projectdesk_server::telemetry::{init_metrics, init_tracing, LogFormat};
use projectdesk_server::{in_memory_backend, DispatchError, ExecuteOptions, PipelineConfig, RequestDispatcher};
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "projectdesk", version, about = "Project management request pipeline demo")]
struct Args {
    /// Log output format.
    #[arg(long, env = "PROJECTDESK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Log directives, used when `RUST_LOG` is unset.
    #[arg(long, env = "PROJECTDESK_LOG", default_value = "projectdesk_server=info")]
    log: String,

    /// Serve Prometheus metrics on this address and keep running until Ctrl-C.
    #[arg(long, env = "PROJECTDESK_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Requests slower than this are logged as slow.
    #[arg(long, env = "PROJECTDESK_SLOW_REQUEST_MS", default_value_t = 500)]
    slow_request_ms: u64,

    /// Default per-request deadline.
    #[arg(long, env = "PROJECTDESK_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// In-flight requests above this are rejected.
    #[arg(long, env = "PROJECTDESK_MAX_CONCURRENT", default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..))]
    max_concurrent: u32,

    /// Interval between sweeps of expired cache entries.
    #[arg(long, env = "PROJECTDESK_CACHE_SWEEP_MS", default_value_t = 60_000, value_parser = clap::value_parser!(u64).range(1..))]
    cache_sweep_ms: u64,

    /// Page size for list queries that do not ask for one.
    #[arg(long, env = "PROJECTDESK_PAGE_SIZE", default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=100))]
    page_size: u32,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            default_operation_timeout_ms: self.timeout_ms,
            max_concurrent_operations: self.max_concurrent,
            slow_request_threshold_ms: self.slow_request_ms,
            cache_sweep_interval_ms: self.cache_sweep_ms,
            default_page_size: self.page_size,
            ..PipelineConfig::default()
        }
    }
}

fn print_step<T: Serialize>(step: &str, result: &Result<Response<T>, DispatchError>) -> anyhow::Result<()> {
    let response = match result {
        Ok(response) => serde_json::to_value(response)?,
        Err(err) => json!({ "status": "fault", "error": err.to_string() }),
    };
    println!("{}", serde_json::to_string_pretty(&json!({ "step": step, "response": response }))?);
    Ok(())
}

async fn run_script(dispatcher: &RequestDispatcher) -> anyhow::Result<()> {
    let as_demo = || ExecuteOptions {
        context: RequestContext::for_actor("demo").with_trace_id("script"),
        ..ExecuteOptions::default()
    };
    let day = |d: u32| NaiveDate::from_ymd_opt(2024, 5, d).ok_or_else(|| anyhow::anyhow!("bad day {d}"));

    let created = dispatcher
        .execute_with(
            CreateProject { status: Some("active".to_string()), ..CreateProject::new("APL", "Apollo") },
            as_demo(),
        )
        .await;
    print_step("create project", &created)?;

    let invalid = dispatcher
        .execute_with(CreateProject { budget: Some(-1.0), ..CreateProject::new("x", "") }, as_demo())
        .await;
    print_step("create invalid project", &invalid)?;

    for step in ["get project (miss)", "get project (hit)"] {
        let fetched = dispatcher.execute(GetProject { code: "APL".to_string() }).await;
        print_step(step, &fetched)?;
    }

    let task = dispatcher
        .execute_with(
            CreateTask { priority: Some("high".to_string()), ..CreateTask::new("APL", "Launch window") },
            as_demo(),
        )
        .await;
    print_step("create task", &task)?;
    let Ok(Response::Success(task)) = task else {
        anyhow::bail!("task creation failed");
    };

    let skipped = dispatcher
        .execute(ChangeTaskStatus { task_id: task.id, status: "done".to_string() })
        .await;
    print_step("skip to done", &skipped)?;

    let logged_on = day(6)?;
    let (first, second) = tokio::join!(
        dispatcher.execute_with(CreateTimeEntry::new(task.id, 5.0, logged_on), as_demo()),
        dispatcher.execute_with(CreateTimeEntry::new(task.id, 5.0, logged_on), as_demo()),
    );
    print_step("log 5h", &first)?;
    print_step("log 5h concurrently", &second)?;

    let details = dispatcher.execute(GetTask { task_id: task.id }).await;
    print_step("task details", &details)?;

    let tasks = dispatcher
        .execute(ListTasksByProject { project_code: "APL".to_string() })
        .await;
    print_step("tasks of project", &tasks)?;

    let updated = dispatcher
        .execute_with(
            UpdateProject {
                code: "APL".to_string(),
                status: Some("completed".to_string()),
                end_date: Some(day(31)?),
                ..UpdateProject::default()
            },
            as_demo(),
        )
        .await;
    print_step("complete project", &updated)?;

    let listed = dispatcher.execute(ListProjects::default()).await;
    print_step("list projects", &listed)?;

    let deleted = dispatcher.execute(DeleteProject { code: "APL".to_string() }).await;
    print_step("delete project", &deleted)?;

    let missing = dispatcher.execute(GetProject { code: "APL".to_string() }).await;
    print_step("get deleted project", &missing)?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, &args.log)?;
    if let Some(addr) = args.metrics_addr {
        init_metrics(addr)?;
    }

    let config = args.pipeline_config();
    let sweep_every = Duration::from_millis(config.cache_sweep_interval_ms);
    let backend = in_memory_backend(config)?;
    let mut sweeper = CacheSweeper::start(backend.cache.clone(), sweep_every)?;

    run_script(&backend.dispatcher).await?;
    info!(
        projects = backend.store.row_count("projects"),
        cached = backend.cache.len(),
        "script finished"
    );

    if let Some(addr) = args.metrics_addr {
        info!(%addr, "serving metrics, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    sweeper.stop().await?;
    Ok(())
}
