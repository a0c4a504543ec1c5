//! Tagged request outcomes.
//!
//! Expected business failures travel as [`Response::Failure`] values. Faults
//! (store unreachable, programming errors) use the `Err` channel of the
//! pipeline instead, so stages can decide commit/evict by looking at the
//! variant alone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of an expected business failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// One or more validation rules were violated. Produced before any side effect.
    Validation,
    /// A referenced aggregate does not exist.
    NotFound,
    /// A business rule rejected the request (e.g. an invalid state transition).
    Conflict,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation failed",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
        })
    }
}

/// A business failure with every message that contributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {}", .messages.join("; "))]
pub struct Failure {
    pub kind: FailureKind,
    pub messages: Vec<String>,
}

impl Failure {
    #[must_use]
    pub fn validation(messages: Vec<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            messages,
        }
    }

    #[must_use]
    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::NotFound,
            messages: vec![format!("{entity} '{id}' was not found")],
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Conflict,
            messages: vec![message.into()],
        }
    }

    /// All messages joined into a single human-readable reason.
    #[must_use]
    pub fn reason(&self) -> String {
        self.messages.join("; ")
    }
}

/// Result of executing a request: `Success(value)` or `Failure(reason)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Response<T> {
    Success(T),
    Failure(Failure),
}

impl<T> Response<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    /// Converts into a `Result`, handy with `?` inside handlers.
    ///
    /// # Errors
    ///
    /// Returns the contained [`Failure`] for the `Failure` variant.
    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(failure) => Err(failure),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self {
            Self::Success(value) => Response::Success(f(value)),
            Self::Failure(failure) => Response::Failure(failure),
        }
    }
}

impl<T> From<Failure> for Response<T> {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_joins_all_messages() {
        let failure = Failure::validation(vec!["'name' is required".into(), "'code' is required".into()]);
        assert_eq!(failure.reason(), "'name' is required; 'code' is required");
        assert_eq!(
            failure.to_string(),
            "validation failed: 'name' is required; 'code' is required"
        );
    }

    #[test]
    fn not_found_names_entity_and_id() {
        let failure = Failure::not_found("project", "APL");
        assert_eq!(failure.kind, FailureKind::NotFound);
        assert_eq!(failure.reason(), "project 'APL' was not found");
    }

    #[test]
    fn response_accessors() {
        let ok: Response<u32> = Response::Success(7);
        assert!(ok.is_success());
        assert_eq!(ok.success(), Some(&7));
        assert_eq!(ok.map(|v| v * 2).into_result(), Ok(14));

        let failed: Response<u32> = Failure::conflict("closed").into();
        assert!(!failed.is_success());
        assert_eq!(failed.failure().map(|f| f.kind), Some(FailureKind::Conflict));
    }

    #[test]
    fn response_serializes_with_status_tag() {
        let ok: Response<u32> = Response::Success(3);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["body"], 3);

        let failed: Response<u32> = Failure::not_found("task", "x").into();
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["body"]["kind"], "not_found");
    }
}
