//! Cache key grammar and glob patterns.
//!
//! Keys are colon-delimited and bit-reproducible:
//!
//! - `{prefix}:{id}` for single aggregates
//! - `{prefix}:list:page{N}:size{M}:{filterToken}` for paginated lists
//! - `{prefix}:{relation}:{relatedId}` for relational subsets
//!
//! A trailing `:*` turns a prefix into a pattern for bulk eviction.

use std::fmt;

use regex::Regex;

/// Segment that marks paginated list keys.
pub const LIST_SEGMENT: &str = "list";

#[derive(Debug, thiserror::Error)]
pub enum CacheKeyError {
    #[error("invalid cache pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A fully-qualified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// `{prefix}:{id}`.
    #[must_use]
    pub fn entity(prefix: &str, id: impl fmt::Display) -> Self {
        Self(format!("{prefix}:{id}"))
    }

    /// `{prefix}:list:page{page}:size{size}:{filter_token}`.
    #[must_use]
    pub fn list(prefix: &str, page: u32, size: u32, filter_token: &str) -> Self {
        Self(format!("{prefix}:{LIST_SEGMENT}:page{page}:size{size}:{filter_token}"))
    }

    /// `{prefix}:{relation}:{related_id}`.
    #[must_use]
    pub fn relation(prefix: &str, relation: &str, related_id: impl fmt::Display) -> Self {
        Self(format!("{prefix}:{relation}:{related_id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What an invalidation evicts: one exact key or every key matching a glob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CachePattern {
    Exact(CacheKey),
    Glob(String),
}

impl CachePattern {
    #[must_use]
    pub fn exact(key: CacheKey) -> Self {
        Self::Exact(key)
    }

    /// `{prefix}:list:*`: every paginated list of an entity.
    #[must_use]
    pub fn all_lists(prefix: &str) -> Self {
        Self::Glob(format!("{prefix}:{LIST_SEGMENT}:*"))
    }

    /// `{prefix}:{relation}:{related_id}:*` style bulk pattern from a key.
    #[must_use]
    pub fn under(key: &CacheKey) -> Self {
        Self::Glob(format!("{key}:*"))
    }

    #[must_use]
    pub fn glob(pattern: impl Into<String>) -> Self {
        Self::Glob(pattern.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(key) => key.as_str(),
            Self::Glob(pattern) => pattern,
        }
    }

    #[must_use]
    pub fn is_glob(&self) -> bool {
        matches!(self, Self::Glob(_))
    }
}

impl fmt::Display for CachePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled glob matcher. `*` matches any run of characters (including `:`),
/// `?` matches exactly one character. Everything else is literal.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    regex: Regex,
}

impl GlobMatcher {
    /// Compiles a glob into an anchored regular expression.
    ///
    /// # Errors
    ///
    /// Returns [`CacheKeyError::InvalidPattern`] if the translated expression
    /// fails to compile (e.g. exceeds the regex size limit).
    pub fn new(pattern: &str) -> Result<Self, CacheKeyError> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if ch == '*' { "(?s:.*)" } else { "(?s:.)" });
                }
                _ => literal.push(ch),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|source| CacheKeyError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    #[must_use]
    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}
