//! `projectdesk` core: request contracts, responses, cache keys, validation rules and entities.
//!
//! Everything here is runtime-agnostic. The pipeline, unit of work and cache
//! live in `projectdesk-server`.

pub mod cache_key;
pub mod context;
pub mod entities;
pub mod hash;
pub mod request;
pub mod response;
pub mod ttl;
pub mod validation;

pub use cache_key::{CacheKey, CacheKeyError, CachePattern, GlobMatcher};
pub use context::RequestContext;
pub use entities::{Entity, Project, ProjectStatus, Task, TaskPriority, TaskStatus, TimeEntry};
pub use request::{Command, Query, Request, RequestKind};
pub use response::{Failure, FailureKind, Response};
pub use ttl::CacheTtl;
pub use validation::{RuleSet, ValidationResult};
