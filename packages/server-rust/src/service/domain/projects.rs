//! Projects: the top-level aggregate, keyed by a short uppercase code.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use projectdesk_core::hash::filter_token;
use projectdesk_core::{
    CacheKey, CachePattern, CacheTtl, Command, Entity, Failure, Project, ProjectStatus, Query,
    Request, Response, RuleSet, Task, TimeEntry,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tasks::{project_tasks_key, task_key};
use super::time_entries::task_entries_key;
use super::Paging;
use crate::service::handler::{Handler, HandlerContext};
use crate::service::registry::{CommandRegistration, HandlerRegistry, QueryRegistration};
use crate::storage::{Page, Repository};

const CODE_PATTERN: &str = r"^[A-Z][A-Z0-9]{1,9}$";
const END_BEFORE_START: &str = "'end_date' must be on or after 'start_date'";

#[must_use]
pub fn project_key(code: &str) -> CacheKey {
    CacheKey::entity(Project::TABLE, code)
}

fn project_scope(code: &str) -> Vec<CachePattern> {
    vec![
        CachePattern::exact(project_key(code)),
        CachePattern::all_lists(Project::TABLE),
    ]
}

fn dates_ordered(start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => end >= start,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// CreateProject
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProject {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    /// Defaults to today.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
}

impl CreateProject {
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            status: None,
            start_date: None,
            end_date: None,
            budget: None,
        }
    }
}

impl Request for CreateProject {
    type Output = Project;
    const NAME: &'static str = "CreateProject";
}
impl Command for CreateProject {}

/// # Errors
///
/// Returns an error if the code pattern fails to compile.
pub fn create_project_rules() -> Result<RuleSet<CreateProject>, regex::Error> {
    Ok(RuleSet::<CreateProject>::new()
        .required("code", |r| Some(r.code.as_str()))
        .matches(
            "code",
            |r| Some(r.code.as_str()),
            CODE_PATTERN,
            "2-10 uppercase letters or digits starting with a letter",
        )?
        .required("name", |r| Some(r.name.as_str()))
        .length("name", |r| Some(r.name.as_str()), 1, 100)
        .length("description", |r| r.description.as_deref(), 0, 2000)
        .one_of("status", |r| r.status.as_deref(), ProjectStatus::NAMES)
        .range("budget", |r| r.budget, 0.0, 1_000_000_000.0)
        .must(|r| dates_ordered(r.start_date, r.end_date), END_BEFORE_START))
}

#[must_use]
pub fn create_project_scope(request: &CreateProject, _created: &Project) -> Vec<CachePattern> {
    project_scope(&request.code)
}

pub struct CreateProjectHandler;

#[async_trait]
impl Handler<CreateProject> for CreateProjectHandler {
    async fn handle(
        &self,
        request: &CreateProject,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<Project>> {
        let projects = ctx.repository::<Project>();
        if projects.get_by_id(&request.code).await?.is_some() {
            return Ok(Failure::conflict(format!("project '{}' already exists", request.code)).into());
        }

        let start_date = request.start_date.unwrap_or_else(|| Utc::now().date_naive());
        if !dates_ordered(Some(start_date), request.end_date) {
            return Ok(Failure::validation(vec![END_BEFORE_START.to_string()]).into());
        }

        let project = Project {
            code: request.code.clone(),
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            status: request
                .status
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(ProjectStatus::Planning),
            start_date,
            end_date: request.end_date,
            budget: request.budget,
            organization_id: ctx.request().organization_id.clone(),
            created_by: ctx.actor().map(str::to_string),
        };
        projects.add(&project)?;
        ctx.save_changes().await?;
        Ok(Response::Success(project))
    }
}

// ---------------------------------------------------------------------------
// UpdateProject
// ---------------------------------------------------------------------------

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProject {
    pub code: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
}

impl UpdateProject {
    fn changes_details(&self) -> bool {
        self.name.is_some() || self.description.is_some() || self.end_date.is_some() || self.budget.is_some()
    }
}

impl Request for UpdateProject {
    type Output = Project;
    const NAME: &'static str = "UpdateProject";
}
impl Command for UpdateProject {}

#[must_use]
pub fn update_project_rules() -> RuleSet<UpdateProject> {
    RuleSet::<UpdateProject>::new()
        .required("code", |r| Some(r.code.as_str()))
        .length("name", |r| r.name.as_deref(), 1, 100)
        .length("description", |r| r.description.as_deref(), 0, 2000)
        .one_of("status", |r| r.status.as_deref(), ProjectStatus::NAMES)
        .range("budget", |r| r.budget, 0.0, 1_000_000_000.0)
        .must(|r| r.changes_details() || r.status.is_some(), "nothing to update")
}

#[must_use]
pub fn update_project_scope(request: &UpdateProject, _updated: &Project) -> Vec<CachePattern> {
    project_scope(&request.code)
}

pub struct UpdateProjectHandler;

#[async_trait]
impl Handler<UpdateProject> for UpdateProjectHandler {
    async fn handle(
        &self,
        request: &UpdateProject,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<Project>> {
        let projects = ctx.repository::<Project>();
        let Some(mut project) = projects.get_by_id(&request.code).await? else {
            return Ok(Failure::not_found("project", &request.code).into());
        };

        // Closed projects may only be reopened.
        if project.status.is_closed() && request.changes_details() {
            return Ok(Failure::conflict(format!(
                "project '{}' is {} and cannot be modified",
                project.code,
                project.status.as_str()
            ))
            .into());
        }

        if let Some(name) = &request.name {
            project.name = name.trim().to_string();
        }
        if let Some(description) = &request.description {
            project.description = Some(description.clone());
        }
        if let Some(status) = &request.status {
            project.status = status.parse()?;
        }
        if let Some(end_date) = request.end_date {
            if !dates_ordered(Some(project.start_date), Some(end_date)) {
                return Ok(Failure::validation(vec![END_BEFORE_START.to_string()]).into());
            }
            project.end_date = Some(end_date);
        }
        if let Some(budget) = request.budget {
            project.budget = Some(budget);
        }

        projects.update(&project)?;
        ctx.save_changes().await?;
        Ok(Response::Success(project))
    }
}

// ---------------------------------------------------------------------------
// DeleteProject
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteProject {
    pub code: String,
}

impl Request for DeleteProject {
    type Output = DeletedProject;
    const NAME: &'static str = "DeleteProject";
}
impl Command for DeleteProject {}

/// What a project deletion removed along with the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedProject {
    pub code: String,
    pub task_ids: Vec<Uuid>,
    pub time_entries: usize,
}

#[must_use]
pub fn delete_project_scope(request: &DeleteProject, deleted: &DeletedProject) -> Vec<CachePattern> {
    let mut patterns = project_scope(&request.code);
    patterns.push(CachePattern::exact(project_tasks_key(&request.code)));
    for task_id in &deleted.task_ids {
        patterns.push(CachePattern::exact(task_key(*task_id)));
        patterns.push(CachePattern::exact(task_entries_key(*task_id)));
    }
    patterns
}

/// Removes the project with its tasks and their time entries. Active
/// projects must be completed or cancelled first.
pub struct DeleteProjectHandler;

#[async_trait]
impl Handler<DeleteProject> for DeleteProjectHandler {
    async fn handle(
        &self,
        request: &DeleteProject,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<DeletedProject>> {
        let projects = ctx.repository::<Project>();
        let Some(project) = projects.get_by_id(&request.code).await? else {
            return Ok(Failure::not_found("project", &request.code).into());
        };
        if project.status == ProjectStatus::Active {
            return Ok(Failure::conflict(format!(
                "project '{}' is active; complete or cancel it first",
                project.code
            ))
            .into());
        }

        let tasks = ctx.repository::<Task>();
        let task_ids: Vec<Uuid> = tasks
            .query()
            .await?
            .filter(|task| task.project_code == project.code)
            .into_vec()
            .into_iter()
            .map(|task| task.id)
            .collect();

        let entries = ctx.repository::<TimeEntry>();
        let entry_ids: Vec<String> = entries
            .query()
            .await?
            .filter(|entry| task_ids.contains(&entry.task_id))
            .into_vec()
            .iter()
            .map(Entity::id)
            .collect();

        for id in &entry_ids {
            entries.remove(id);
        }
        for id in &task_ids {
            tasks.remove(&id.to_string());
        }
        projects.remove(&project.code);
        ctx.save_changes().await?;

        Ok(Response::Success(DeletedProject {
            code: project.code,
            task_ids,
            time_entries: entry_ids.len(),
        }))
    }
}

// ---------------------------------------------------------------------------
// GetProject
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProject {
    pub code: String,
}

impl Request for GetProject {
    type Output = Project;
    const NAME: &'static str = "GetProject";
}
impl Query for GetProject {}

/// Read-through on `projects:{code}`, cached for [`CacheTtl::Medium`].
pub struct GetProjectHandler;

#[async_trait]
impl Handler<GetProject> for GetProjectHandler {
    async fn handle(&self, request: &GetProject, ctx: &HandlerContext) -> anyhow::Result<Response<Project>> {
        let projects = ctx.repository::<Project>();
        let code = request.code.clone();
        let found = ctx
            .cache()
            .get_or_load(&project_key(&request.code), CacheTtl::Medium, move || async move {
                projects.get_by_id(&code).await
            })
            .await?;
        Ok(found.map_or_else(|| Failure::not_found("project", &request.code).into(), Response::Success))
    }
}

// ---------------------------------------------------------------------------
// ListProjects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListProjects {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub status: Option<String>,
    pub organization_id: Option<String>,
}

impl Request for ListProjects {
    type Output = Page<Project>;
    const NAME: &'static str = "ListProjects";
}
impl Query for ListProjects {}

#[must_use]
pub fn list_projects_rules(paging: Paging) -> RuleSet<ListProjects> {
    RuleSet::<ListProjects>::new()
        .range("page", |r| r.page, 1, 10_000)
        .range("size", |r| r.size, 1, paging.max_size)
        .one_of("status", |r| r.status.as_deref(), ProjectStatus::NAMES)
}

/// The list key for a resolved request:
/// `projects:list:page{N}:size{M}:{filterToken}`.
#[must_use]
pub fn project_list_key(request: &ListProjects, paging: Paging) -> CacheKey {
    let (page, size) = paging.resolve(request.page, request.size);
    let token = filter_token(&[
        ("status", request.status.as_deref().unwrap_or_default()),
        ("organization_id", request.organization_id.as_deref().unwrap_or_default()),
    ]);
    CacheKey::list(Project::TABLE, page, size, &token)
}

/// Paginated listing ordered by code, cached for [`CacheTtl::Short`].
pub struct ListProjectsHandler {
    paging: Paging,
}

impl ListProjectsHandler {
    #[must_use]
    pub fn new(paging: Paging) -> Self {
        Self { paging }
    }
}

#[async_trait]
impl Handler<ListProjects> for ListProjectsHandler {
    async fn handle(
        &self,
        request: &ListProjects,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<Page<Project>>> {
        let (page, size) = self.paging.resolve(request.page, request.size);
        let key = project_list_key(request, self.paging);
        let status: Option<ProjectStatus> = request.status.as_deref().map(str::parse).transpose()?;
        let organization = request.organization_id.clone();
        let projects = ctx.repository::<Project>();

        let found = ctx
            .cache()
            .get_or_load(&key, CacheTtl::Short, move || async move {
                let listed = projects
                    .query()
                    .await?
                    .filter(|p| status.map_or(true, |s| p.status == s))
                    .filter(|p| {
                        organization
                            .as_ref()
                            .map_or(true, |org| p.organization_id.as_ref() == Some(org))
                    })
                    .sort_by(|a, b| a.code.cmp(&b.code))
                    .paginate(page, size);
                Ok(Some(listed))
            })
            .await?;

        Ok(Response::Success(found.unwrap_or(Page {
            items: Vec::new(),
            page,
            size,
            total: 0,
        })))
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub(super) fn register(registry: &mut HandlerRegistry, paging: Paging) -> anyhow::Result<()> {
    registry.register_command(
        CommandRegistration::<CreateProject>::new(CreateProjectHandler)
            .rules(create_project_rules()?)
            .invalidates(create_project_scope),
    )?;
    registry.register_command(
        CommandRegistration::<UpdateProject>::new(UpdateProjectHandler)
            .rules(update_project_rules())
            .invalidates(update_project_scope),
    )?;
    registry.register_command(
        CommandRegistration::<DeleteProject>::new(DeleteProjectHandler)
            .rules(RuleSet::<DeleteProject>::new().required("code", |r| Some(r.code.as_str())))
            .invalidates(delete_project_scope),
    )?;
    registry.register_query(
        QueryRegistration::<GetProject>::new(GetProjectHandler)
            .rules(RuleSet::<GetProject>::new().required("code", |r| Some(r.code.as_str()))),
    )?;
    registry.register_query(
        QueryRegistration::<ListProjects>::new(ListProjectsHandler::new(paging))
            .rules(list_projects_rules(paging)),
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
    use crate::service::test_support::DomainHarness;

    fn apollo() -> CreateProject {
        CreateProject {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..CreateProject::new("APL", "Apollo")
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let h = DomainHarness::new();
        let created = h.dispatcher.execute(apollo()).await.unwrap().into_result().unwrap();
        assert_eq!(created.status, ProjectStatus::Planning);

        let fetched = h
            .dispatcher
            .execute(GetProject { code: "APL".to_string() })
            .await
            .unwrap();
        assert_eq!(fetched, Response::Success(created));
    }

    #[tokio::test]
    async fn duplicate_code_is_a_conflict() {
        let h = DomainHarness::new();
        h.dispatcher.execute(apollo()).await.unwrap();
        let resp = h.dispatcher.execute(apollo()).await.unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::Conflict));
        assert_eq!(h.store.commit_count(), 1);
    }

    #[tokio::test]
    async fn invalid_create_reports_every_violation() {
        let h = DomainHarness::new();
        let request = CreateProject {
            status: Some("dormant".to_string()),
            budget: Some(-5.0),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..CreateProject::new("apl", "")
        };

        let failure = h.dispatcher.execute(request).await.unwrap().into_result().unwrap_err();

        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(
            failure.messages,
            vec![
                "'code' must be 2-10 uppercase letters or digits starting with a letter".to_string(),
                "'name' is required".to_string(),
                "'name' must be between 1 and 100 characters".to_string(),
                "'status' must be one of: planning, active, on_hold, completed, cancelled".to_string(),
                "'budget' must be between 0 and 1000000000".to_string(),
                END_BEFORE_START.to_string(),
            ]
        );
        assert_eq!(h.store.read_count(), 0);
    }

    #[tokio::test]
    async fn update_missing_project_is_not_found() {
        let h = DomainHarness::new();
        let resp = h
            .dispatcher
            .execute(UpdateProject {
                code: "NOPE".to_string(),
                name: Some("x".to_string()),
                ..UpdateProject::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn update_evicts_the_cached_project() {
        let h = DomainHarness::new();
        h.dispatcher.execute(apollo()).await.unwrap();
        h.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
        assert!(h.memory.contains("projects:APL"));

        let updated = h
            .dispatcher
            .execute(UpdateProject {
                code: "APL".to_string(),
                name: Some("Apollo II".to_string()),
                ..UpdateProject::default()
            })
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert!(!h.memory.contains("projects:APL"));
        let fetched = h.dispatcher.execute(GetProject { code: "APL".to_string() }).await.unwrap();
        assert_eq!(fetched, Response::Success(updated));
    }

    #[tokio::test]
    async fn closed_projects_only_reopen() {
        let h = DomainHarness::new();
        h.dispatcher
            .execute(CreateProject { status: Some("completed".to_string()), ..apollo() })
            .await
            .unwrap();

        let rename = UpdateProject {
            code: "APL".to_string(),
            name: Some("Renamed".to_string()),
            ..UpdateProject::default()
        };
        let resp = h.dispatcher.execute(rename).await.unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::Conflict));

        let reopen = UpdateProject {
            code: "APL".to_string(),
            status: Some("active".to_string()),
            ..UpdateProject::default()
        };
        let project = h.dispatcher.execute(reopen).await.unwrap().into_result().unwrap();
        assert_eq!(project.status, ProjectStatus::Active);
    }

    #[tokio::test]
    async fn list_is_sorted_filtered_and_cached_per_page() {
        let h = DomainHarness::new();
        for code in ["ZED", "APL", "MER"] {
            h.dispatcher
                .execute(CreateProject::new(code, format!("Project {code}")))
                .await
                .unwrap();
        }
        h.dispatcher
            .execute(CreateProject { status: Some("active".to_string()), ..CreateProject::new("GEM", "Gemini") })
            .await
            .unwrap();

        let page = h
            .dispatcher
            .execute(ListProjects { size: Some(2), ..ListProjects::default() })
            .await
            .unwrap()
            .into_result()
            .unwrap();
        let codes: Vec<&str> = page.items.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, ["APL", "GEM"]);
        assert_eq!(page.total, 4);
        assert!(h.memory.contains("projects:list:page1:size2:all"));

        let active = h
            .dispatcher
            .execute(ListProjects { status: Some("active".to_string()), ..ListProjects::default() })
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(active.total, 1);

        h.dispatcher.execute(CreateProject::new("BOB", "Bob")).await.unwrap();
        assert!(!h.memory.contains("projects:list:page1:size2:all"));
    }

    #[tokio::test]
    async fn delete_removes_children_and_their_cache_entries() {
        use crate::service::domain::{CreateTask, CreateTimeEntry, GetTask};

        let h = DomainHarness::new();
        h.dispatcher.execute(apollo()).await.unwrap();
        let task = h
            .dispatcher
            .execute(CreateTask::new("APL", "Launch"))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        h.dispatcher
            .execute(
                CreateTimeEntry::new(task.id, 2.0, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
                    .with_user("ana"),
            )
            .await
            .unwrap();
        h.dispatcher.execute(GetTask { task_id: task.id }).await.unwrap();
        assert!(h.memory.contains(task_key(task.id).as_str()));

        let deleted = h
            .dispatcher
            .execute(DeleteProject { code: "APL".to_string() })
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(deleted.task_ids, vec![task.id]);
        assert_eq!(deleted.time_entries, 1);
        assert!(!h.memory.contains(task_key(task.id).as_str()));
        assert_eq!(h.store.row_count(Project::TABLE), 0);
        assert_eq!(h.store.row_count(Task::TABLE), 0);
        assert_eq!(h.store.row_count(TimeEntry::TABLE), 0);
    }

    #[tokio::test]
    async fn active_projects_cannot_be_deleted() {
        let h = DomainHarness::new();
        h.dispatcher
            .execute(CreateProject { status: Some("active".to_string()), ..apollo() })
            .await
            .unwrap();
        let resp = h.dispatcher.execute(DeleteProject { code: "APL".to_string() }).await.unwrap();
        assert_eq!(resp.failure().map(|f| f.kind), Some(FailureKind::Conflict));
        assert_eq!(h.store.row_count(Project::TABLE), 1);
    }

    #[tokio::test]
    async fn filters_with_separator_characters_get_their_own_cache_entry() {
        use projectdesk_core::RequestContext;

        use crate::service::ExecuteOptions;

        let h = DomainHarness::new();
        let options = ExecuteOptions {
            context: RequestContext {
                organization_id: Some("x&status=active".to_string()),
                ..RequestContext::default()
            },
            ..ExecuteOptions::default()
        };
        h.dispatcher.execute_with(apollo(), options).await.unwrap();

        let tricky = ListProjects {
            organization_id: Some("x&status=active".to_string()),
            ..ListProjects::default()
        };
        let split = ListProjects {
            organization_id: Some("x".to_string()),
            status: Some("active".to_string()),
            ..ListProjects::default()
        };
        let paging = Paging::from_config(&crate::service::PipelineConfig::default());
        assert_ne!(project_list_key(&tricky, paging), project_list_key(&split, paging));

        let first = h.dispatcher.execute(tricky).await.unwrap().into_result().unwrap();
        assert_eq!(first.total, 1);
        let second = h.dispatcher.execute(split).await.unwrap().into_result().unwrap();
        assert_eq!(second.total, 0);
        assert!(second.items.is_empty());
    }
}
