//! Request contracts for the dispatcher.
//!
//! A request type declares its output and a stable name. Whether it mutates
//! state is expressed by implementing [`Command`] or [`Query`], and the
//! dispatcher records the matching [`RequestKind`] when the handler is
//! registered. Nothing inspects type names at runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An operation descriptor routed through the pipeline.
pub trait Request: Send + Sync + 'static {
    /// Value carried by a successful response.
    type Output: Send + 'static;

    /// Stable name used in logs, metrics and error messages.
    const NAME: &'static str;
}

/// Marker for requests that mutate state. Commands run inside a transaction
/// and trigger cache invalidation on success.
pub trait Command: Request {}

/// Marker for read-only requests. Queries never open a transaction.
pub trait Query: Request {}

/// Capability of a registered request type, fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Registered through `register_command`.
    Mutating,
    /// Registered through `register_query`.
    Query,
}

impl RequestKind {
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Mutating)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutating => "command",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
