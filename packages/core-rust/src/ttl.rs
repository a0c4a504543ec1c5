//! Cache time-to-live classes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coarse TTL buckets assigned to cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTtl {
    /// 5 minutes.
    Short,
    /// 15 minutes.
    Medium,
    /// 1 hour.
    Long,
    /// 24 hours.
    VeryLong,
}

impl CacheTtl {
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(5 * 60),
            Self::Medium => Duration::from_secs(15 * 60),
            Self::Long => Duration::from_secs(60 * 60),
            Self::VeryLong => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for CacheTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
            Self::VeryLong => "very_long",
        })
    }
}

impl From<CacheTtl> for Duration {
    fn from(ttl: CacheTtl) -> Self {
        ttl.duration()
    }
}
