//! Tasks belong to a project and move through a fixed status workflow.

use async_trait::async_trait;
use projectdesk_core::{
    CacheKey, CachePattern, CacheTtl, Command, Entity, Failure, Project, Query, Request, Response,
    RuleSet, Task, TaskPriority, TaskStatus, TimeEntry,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::handler::{Handler, HandlerContext};
use crate::service::registry::{CommandRegistration, HandlerRegistry, QueryRegistration};
use crate::storage::Repository;

/// `tasks:{id}`, holding [`TaskDetails`].
#[must_use]
pub fn task_key(task_id: Uuid) -> CacheKey {
    CacheKey::entity(Task::TABLE, task_id)
}

/// `tasks:project:{code}`, holding every task of the project.
#[must_use]
pub fn project_tasks_key(project_code: &str) -> CacheKey {
    CacheKey::relation(Task::TABLE, "project", project_code)
}

// ---------------------------------------------------------------------------
// CreateTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub project_code: String,
    pub title: String,
    pub priority: Option<String>,
    pub estimated_hours: Option<f64>,
    pub assignee: Option<String>,
}

impl CreateTask {
    #[must_use]
    pub fn new(project_code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project_code: project_code.into(),
            title: title.into(),
            priority: None,
            estimated_hours: None,
            assignee: None,
        }
    }
}

impl Request for CreateTask {
    type Output = Task;
    const NAME: &'static str = "CreateTask";
}
impl Command for CreateTask {}

#[must_use]
pub fn create_task_rules() -> RuleSet<CreateTask> {
    RuleSet::<CreateTask>::new()
        .required("project_code", |r| Some(r.project_code.as_str()))
        .required("title", |r| Some(r.title.as_str()))
        .length("title", |r| Some(r.title.as_str()), 1, 200)
        .one_of("priority", |r| r.priority.as_deref(), TaskPriority::NAMES)
        .range("estimated_hours", |r| r.estimated_hours, 0.0, 1000.0)
}

pub struct CreateTaskHandler;

#[async_trait]
impl Handler<CreateTask> for CreateTaskHandler {
    async fn handle(&self, request: &CreateTask, ctx: &HandlerContext) -> anyhow::Result<Response<Task>> {
        let Some(project) = ctx.repository::<Project>().get_by_id(&request.project_code).await? else {
            return Ok(Failure::not_found("project", &request.project_code).into());
        };
        if project.status.is_closed() {
            return Ok(Failure::conflict(format!(
                "project '{}' is {} and accepts no new tasks",
                project.code,
                project.status.as_str()
            ))
            .into());
        }

        let task = Task {
            id: Uuid::new_v4(),
            project_code: project.code,
            title: request.title.trim().to_string(),
            status: TaskStatus::Todo,
            priority: request
                .priority
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(TaskPriority::Medium),
            estimated_hours: request.estimated_hours,
            assignee: request.assignee.clone(),
        };
        ctx.repository::<Task>().add(&task)?;
        ctx.save_changes().await?;
        Ok(Response::Success(task))
    }
}

// ---------------------------------------------------------------------------
// ChangeTaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeTaskStatus {
    pub task_id: Uuid,
    pub status: String,
}

impl Request for ChangeTaskStatus {
    type Output = Task;
    const NAME: &'static str = "ChangeTaskStatus";
}
impl Command for ChangeTaskStatus {}

/// Moving to the current status is a no-op success; any other move must be
/// an edge of the workflow or the request is a conflict.
pub struct ChangeTaskStatusHandler;

#[async_trait]
impl Handler<ChangeTaskStatus> for ChangeTaskStatusHandler {
    async fn handle(
        &self,
        request: &ChangeTaskStatus,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<Task>> {
        let tasks = ctx.repository::<Task>();
        let Some(mut task) = tasks.get_by_id(&request.task_id.to_string()).await? else {
            return Ok(Failure::not_found("task", request.task_id).into());
        };
        let next: TaskStatus = request.status.parse()?;
        if task.status == next {
            return Ok(Response::Success(task));
        }
        if !task.status.can_transition_to(next) {
            return Ok(Failure::conflict(format!("cannot move task from {} to {next}", task.status)).into());
        }

        task.status = next;
        tasks.update(&task)?;
        ctx.save_changes().await?;
        Ok(Response::Success(task))
    }
}

// ---------------------------------------------------------------------------
// GetTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTask {
    pub task_id: Uuid,
}

/// A task with the hours logged against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub task: Task,
    pub logged_hours: f64,
    pub entries: usize,
}

impl Request for GetTask {
    type Output = TaskDetails;
    const NAME: &'static str = "GetTask";
}
impl Query for GetTask {}

pub struct GetTaskHandler;

#[async_trait]
impl Handler<GetTask> for GetTaskHandler {
    async fn handle(&self, request: &GetTask, ctx: &HandlerContext) -> anyhow::Result<Response<TaskDetails>> {
        let task_id = request.task_id;
        let tasks = ctx.repository::<Task>();
        let entries = ctx.repository::<TimeEntry>();

        let found = ctx
            .cache()
            .get_or_load(&task_key(task_id), CacheTtl::Medium, move || async move {
                let Some(task) = tasks.get_by_id(&task_id.to_string()).await? else {
                    return Ok(None);
                };
                let logged = entries.query().await?.filter(|e| e.task_id == task_id).into_vec();
                Ok(Some(TaskDetails {
                    task,
                    logged_hours: logged.iter().map(|e| e.hours).sum(),
                    entries: logged.len(),
                }))
            })
            .await?;

        Ok(found.map_or_else(|| Failure::not_found("task", task_id).into(), Response::Success))
    }
}

// ---------------------------------------------------------------------------
// ListTasksByProject
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksByProject {
    pub project_code: String,
}

impl Request for ListTasksByProject {
    type Output = Vec<Task>;
    const NAME: &'static str = "ListTasksByProject";
}
impl Query for ListTasksByProject {}

/// Highest priority first, then by title.
pub struct ListTasksByProjectHandler;

#[async_trait]
impl Handler<ListTasksByProject> for ListTasksByProjectHandler {
    async fn handle(
        &self,
        request: &ListTasksByProject,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<Vec<Task>>> {
        let code = request.project_code.clone();
        let projects = ctx.repository::<Project>();
        let tasks = ctx.repository::<Task>();

        let found = ctx
            .cache()
            .get_or_load(&project_tasks_key(&code), CacheTtl::Short, move || async move {
                if projects.get_by_id(&code).await?.is_none() {
                    return Ok(None);
                }
                let listed = tasks
                    .query()
                    .await?
                    .filter(|t| t.project_code == code)
                    .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.title.cmp(&b.title)))
                    .into_vec();
                Ok(Some(listed))
            })
            .await?;

        Ok(found.map_or_else(
            || Failure::not_found("project", &request.project_code).into(),
            Response::Success,
        ))
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub(super) fn register(registry: &mut HandlerRegistry) -> anyhow::Result<()> {
    registry.register_command(
        CommandRegistration::<CreateTask>::new(CreateTaskHandler)
            .rules(create_task_rules())
            .invalidates(|request, _task| vec![CachePattern::exact(project_tasks_key(&request.project_code))]),
    )?;
    registry.register_command(
        CommandRegistration::<ChangeTaskStatus>::new(ChangeTaskStatusHandler)
            .rules(
                RuleSet::<ChangeTaskStatus>::new()
                    .required("status", |r| Some(r.status.as_str()))
                    .one_of("status", |r| Some(r.status.as_str()), TaskStatus::NAMES),
            )
            .invalidates(|request, task| {
                vec![
                    CachePattern::exact(task_key(request.task_id)),
                    CachePattern::exact(project_tasks_key(&task.project_code)),
                ]
            }),
    )?;
    registry.register_query(QueryRegistration::<GetTask>::new(GetTaskHandler))?;
    registry.register_query(
        QueryRegistration::<ListTasksByProject>::new(ListTasksByProjectHandler).rules(
            RuleSet::<ListTasksByProject>::new().required("project_code", |r| Some(r.project_code.as_str())),
        ),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use projectdesk_core::FailureKind;

    use super::*;
    use crate::service::domain::CreateProject;
    use crate::service::test_support::DomainHarness;

    async fn with_project(status: &str) -> DomainHarness {
        let h = DomainHarness::new();
        h.dispatcher
            .execute(CreateProject { status: Some(status.to_string()), ..CreateProject::new("APL", "Apollo") })
            .await
            .unwrap()
            .into_result()
            .unwrap();
        h
    }

    async fn create(h: &DomainHarness, title: &str, priority: &str) -> Task {
        h.dispatcher
            .execute(CreateTask { priority: Some(priority.to_string()), ..CreateTask::new("APL", title) })
            .await
            .unwrap()
            .into_result()
            .unwrap()
    }

    #[tokio::test]
    async fn task_in_missing_project_is_not_found() {
        let h = DomainHarness::new();
        let resp = h.dispatcher.execute(CreateTask::new("NOPE", "Orphan")).await.unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn closed_project_rejects_new_tasks() {
        let h = with_project("cancelled").await;
        let resp = h.dispatcher.execute(CreateTask::new("APL", "Late")).await.unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::Conflict));
        assert_eq!(h.store.row_count(Task::TABLE), 0);
    }

    #[tokio::test]
    async fn workflow_violations_are_conflicts() {
        let h = with_project("active").await;
        let task = create(&h, "Launch", "high").await;

        let skip = ChangeTaskStatus { task_id: task.id, status: "done".to_string() };
        let failure = h.dispatcher.execute(skip).await.unwrap().into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Conflict);
        assert_eq!(failure.messages, vec!["cannot move task from todo to done".to_string()]);

        let start = ChangeTaskStatus { task_id: task.id, status: "in_progress".to_string() };
        let moved = h.dispatcher.execute(start).await.unwrap().into_result().unwrap();
        assert_eq!(moved.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn status_change_evicts_task_details() {
        let h = with_project("active").await;
        let task = create(&h, "Launch", "high").await;
        h.dispatcher.execute(GetTask { task_id: task.id }).await.unwrap();
        assert!(h.memory.contains(task_key(task.id).as_str()));

        h.dispatcher
            .execute(ChangeTaskStatus { task_id: task.id, status: "blocked".to_string() })
            .await
            .unwrap();

        assert!(!h.memory.contains(task_key(task.id).as_str()));
        let details = h
            .dispatcher
            .execute(GetTask { task_id: task.id })
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(details.task.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn listing_orders_by_priority_and_is_invalidated_by_new_tasks() {
        let h = with_project("active").await;
        create(&h, "Paint", "low").await;
        create(&h, "Fuel", "critical").await;
        create(&h, "Check", "critical").await;

        let listed = h
            .dispatcher
            .execute(ListTasksByProject { project_code: "APL".to_string() })
            .await
            .unwrap()
            .into_result()
            .unwrap();
        let titles: Vec<&str> = listed.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Check", "Fuel", "Paint"]);
        assert!(h.memory.contains("tasks:project:APL"));

        create(&h, "Launch", "high").await;
        assert!(!h.memory.contains("tasks:project:APL"));
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let h = DomainHarness::new();
        let resp = h.dispatcher.execute(GetTask { task_id: Uuid::new_v4() }).await.unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::NotFound));
        assert!(h.memory.is_empty());
    }
}
