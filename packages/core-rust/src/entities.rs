//! Aggregates persisted through the unit of work.
//!
//! Each entity names its table, which doubles as its cache key prefix.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted aggregate.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name and cache key prefix.
    const TABLE: &'static str;

    /// Primary key rendered as a string.
    fn id(&self) -> String;
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub const NAMES: &'static [&'static str] =
        &["planning", "active", "on_hold", "completed", "cancelled"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::OnHold => "on_hold",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Closed projects accept no new tasks or time entries.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl FromStr for ProjectStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "active" => Ok(Self::Active),
            "on_hold" => Ok(Self::OnHold),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant::new("project status", other)),
        }
    }
}

/// A project, keyed by its short uppercase code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub organization_id: Option<String>,
    pub created_by: Option<String>,
}

impl Entity for Project {
    const TABLE: &'static str = "projects";

    fn id(&self) -> String {
        self.code.clone()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Blocked,
    Done,
}

impl TaskStatus {
    pub const NAMES: &'static [&'static str] = &["todo", "in_progress", "in_review", "blocked", "done"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }

    /// Allowed workflow edges. `Done` is terminal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Blocked, Done, InProgress, InReview, Todo};
        matches!(
            (self, next),
            (Todo, InProgress | Blocked)
                | (InProgress, InReview | Blocked | Todo)
                | (InReview, Done | InProgress)
                | (Blocked, Todo | InProgress)
        )
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "in_review" => Ok(Self::InReview),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            other => Err(UnknownVariant::new("task status", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub const NAMES: &'static [&'static str] = &["low", "medium", "high", "critical"];
}

impl FromStr for TaskPriority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(UnknownVariant::new("task priority", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_code: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub estimated_hours: Option<f64>,
    pub assignee: Option<String>,
}

impl Entity for Task {
    const TABLE: &'static str = "tasks";

    fn id(&self) -> String {
        self.id.to_string()
    }
}

// ---------------------------------------------------------------------------
// TimeEntry
// ---------------------------------------------------------------------------

/// Hours logged against a task. Each entry is its own row, so concurrent
/// entries for the same task never contend on a shared counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub hours: f64,
    pub date: NaiveDate,
    pub note: Option<String>,
}

impl Entity for TimeEntry {
    const TABLE: &'static str = "time_entries";

    fn id(&self) -> String {
        self.id.to_string()
    }
}

// ---------------------------------------------------------------------------
// UnknownVariant
// ---------------------------------------------------------------------------

/// Returned by `FromStr` on the entity enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: '{value}'")]
pub struct UnknownVariant {
    what: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}
