//! Time logged against tasks.
//!
//! Every entry is its own row. Concurrent entries for one task never write
//! the same row, so both commit without coordination.

use async_trait::async_trait;
use chrono::NaiveDate;
use projectdesk_core::{
    CacheKey, CachePattern, CacheTtl, Command, Entity, Failure, Query, Request, Response, RuleSet,
    Task, TaskStatus, TimeEntry,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tasks::task_key;
use crate::service::handler::{Handler, HandlerContext};
use crate::service::registry::{CommandRegistration, HandlerRegistry, QueryRegistration};
use crate::storage::Repository;

/// `time_entries:task:{id}`, holding every entry of the task.
#[must_use]
pub fn task_entries_key(task_id: Uuid) -> CacheKey {
    CacheKey::relation(TimeEntry::TABLE, "task", task_id)
}

// ---------------------------------------------------------------------------
// CreateTimeEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimeEntry {
    pub task_id: Uuid,
    /// Defaults to the calling actor.
    pub user_id: Option<String>,
    pub hours: f64,
    pub date: NaiveDate,
    pub note: Option<String>,
}

impl CreateTimeEntry {
    #[must_use]
    pub fn new(task_id: Uuid, hours: f64, date: NaiveDate) -> Self {
        Self {
            task_id,
            user_id: None,
            hours,
            date,
            note: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl Request for CreateTimeEntry {
    type Output = TimeEntry;
    const NAME: &'static str = "CreateTimeEntry";
}
impl Command for CreateTimeEntry {}

#[must_use]
pub fn create_time_entry_rules() -> RuleSet<CreateTimeEntry> {
    RuleSet::<CreateTimeEntry>::new()
        .range("hours", |r| Some(r.hours), 0.25, 24.0)
        .length("user_id", |r| r.user_id.as_deref(), 1, 64)
        .length("note", |r| r.note.as_deref(), 0, 500)
}

#[must_use]
pub fn create_time_entry_scope(request: &CreateTimeEntry, _entry: &TimeEntry) -> Vec<CachePattern> {
    vec![
        CachePattern::exact(task_key(request.task_id)),
        CachePattern::exact(task_entries_key(request.task_id)),
    ]
}

pub struct CreateTimeEntryHandler;

#[async_trait]
impl Handler<CreateTimeEntry> for CreateTimeEntryHandler {
    async fn handle(
        &self,
        request: &CreateTimeEntry,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<TimeEntry>> {
        let Some(user_id) = request.user_id.as_deref().or(ctx.actor()) else {
            return Ok(Failure::validation(vec!["'user_id' is required".to_string()]).into());
        };
        let Some(task) = ctx.repository::<Task>().get_by_id(&request.task_id.to_string()).await? else {
            return Ok(Failure::not_found("task", request.task_id).into());
        };
        if task.status == TaskStatus::Done {
            return Ok(Failure::conflict(format!("task '{}' is done; time can no longer be logged", task.id)).into());
        }

        let entry = TimeEntry {
            id: Uuid::new_v4(),
            task_id: task.id,
            user_id: user_id.to_string(),
            hours: request.hours,
            date: request.date,
            note: request.note.clone(),
        };
        ctx.repository::<TimeEntry>().add(&entry)?;
        ctx.save_changes().await?;
        Ok(Response::Success(entry))
    }
}

// ---------------------------------------------------------------------------
// ListTimeEntries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTimeEntries {
    pub task_id: Uuid,
}

impl Request for ListTimeEntries {
    type Output = Vec<TimeEntry>;
    const NAME: &'static str = "ListTimeEntries";
}
impl Query for ListTimeEntries {}

/// Entries of one task, oldest first.
pub struct ListTimeEntriesHandler;

#[async_trait]
impl Handler<ListTimeEntries> for ListTimeEntriesHandler {
    async fn handle(
        &self,
        request: &ListTimeEntries,
        ctx: &HandlerContext,
    ) -> anyhow::Result<Response<Vec<TimeEntry>>> {
        let task_id = request.task_id;
        let tasks = ctx.repository::<Task>();
        let entries = ctx.repository::<TimeEntry>();

        let found = ctx
            .cache()
            .get_or_load(&task_entries_key(task_id), CacheTtl::Short, move || async move {
                if tasks.get_by_id(&task_id.to_string()).await?.is_none() {
                    return Ok(None);
                }
                let listed = entries
                    .query()
                    .await?
                    .filter(|e| e.task_id == task_id)
                    .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.user_id.cmp(&b.user_id)))
                    .into_vec();
                Ok(Some(listed))
            })
            .await?;

        Ok(found.map_or_else(|| Failure::not_found("task", task_id).into(), Response::Success))
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub(super) fn register(registry: &mut HandlerRegistry) -> anyhow::Result<()> {
    registry.register_command(
        CommandRegistration::<CreateTimeEntry>::new(CreateTimeEntryHandler)
            .rules(create_time_entry_rules())
            .invalidates(create_time_entry_scope),
    )?;
    registry.register_query(QueryRegistration::<ListTimeEntries>::new(ListTimeEntriesHandler))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
