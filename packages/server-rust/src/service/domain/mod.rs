//! Sample domain: projects, their tasks and the time logged against them.
//!
//! Each submodule declares its requests, rule sets, handlers and cache
//! invalidation scopes, and registers them through [`register_all`].

use crate::service::config::PipelineConfig;
use crate::service::registry::HandlerRegistry;

pub mod projects;
pub mod tasks;
pub mod time_entries;

pub use projects::{CreateProject, DeleteProject, DeletedProject, GetProject, ListProjects, UpdateProject};
pub use tasks::{ChangeTaskStatus, CreateTask, GetTask, ListTasksByProject, TaskDetails};
pub use time_entries::{CreateTimeEntry, ListTimeEntries};

/// Page-size policy for list queries.
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub default_size: u32,
    pub max_size: u32,
}

impl Paging {
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            default_size: config.default_page_size,
            max_size: config.max_page_size,
        }
    }

    /// Effective `(page, size)`: page is 1-based, size is clamped to `[1, max_size]`.
    #[must_use]
    pub fn resolve(self, page: Option<u32>, size: Option<u32>) -> (u32, u32) {
        let page = page.unwrap_or(1).max(1);
        let size = size.unwrap_or(self.default_size).clamp(1, self.max_size.max(1));
        (page, size)
    }
}

/// Register every domain request type.
///
/// # Errors
///
/// Returns an error if a request type is registered twice or a rule set
/// fails to build.
pub fn register_all(registry: &mut HandlerRegistry, config: &PipelineConfig) -> anyhow::Result<()> {
    let paging = Paging::from_config(config);
    projects::register(registry, paging)?;
    tasks::register(registry)?;
    time_entries::register(registry)?;
    Ok(())
}
