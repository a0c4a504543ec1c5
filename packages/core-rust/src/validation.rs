//! Declarative validation rules.
//!
//! A [`RuleSet`] is built once per request type at registration and evaluated
//! by the validation stage. Every rule runs; the result aggregates all
//! violations rather than stopping at the first.

use std::fmt;

use regex::Regex;

type Check<R> = Box<dyn Fn(&R) -> Option<String> + Send + Sync>;

/// Result of validating a request against its rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The request satisfies every rule.
    Valid,
    /// The request violates one or more rules.
    Invalid {
        /// Human-readable descriptions of each violation, in rule order.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<String> {
        match self {
            Self::Valid => Vec::new(),
            Self::Invalid { errors } => errors,
        }
    }
}

/// Ordered list of constraints over a request type `R`.
pub struct RuleSet<R> {
    rules: Vec<Check<R>>,
}

impl<R> Default for RuleSet<R> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<R> fmt::Debug for RuleSet<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl<R: 'static> RuleSet<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The field must be present and not blank.
    #[must_use]
    pub fn required<F>(mut self, field: &'static str, get: F) -> Self
    where
        F: Fn(&R) -> Option<&str> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(move |req| match get(req) {
            Some(value) if !value.trim().is_empty() => None,
            _ => Some(format!("'{field}' is required")),
        }));
        self
    }

    /// Character count within `[min, max]`. Absent values are skipped.
    #[must_use]
    pub fn length<F>(mut self, field: &'static str, get: F, min: usize, max: usize) -> Self
    where
        F: Fn(&R) -> Option<&str> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(move |req| {
            let len = get(req)?.chars().count();
            (len < min || len > max)
                .then(|| format!("'{field}' must be between {min} and {max} characters"))
        }));
        self
    }

    /// Numeric value within `[min, max]`. Absent values are skipped.
    #[must_use]
    pub fn range<N, F>(mut self, field: &'static str, get: F, min: N, max: N) -> Self
    where
        N: PartialOrd + fmt::Display + Copy + Send + Sync + 'static,
        F: Fn(&R) -> Option<N> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(move |req| {
            let value = get(req)?;
            // NaN compares false both ways, so it is rejected too.
            (!(value >= min && value <= max))
                .then(|| format!("'{field}' must be between {min} and {max}"))
        }));
        self
    }

    /// Value must be one of `allowed`. Absent values are skipped.
    #[must_use]
    pub fn one_of<F>(mut self, field: &'static str, get: F, allowed: &'static [&'static str]) -> Self
    where
        F: Fn(&R) -> Option<&str> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(move |req| {
            let value = get(req)?;
            (!allowed.contains(&value))
                .then(|| format!("'{field}' must be one of: {}", allowed.join(", ")))
        }));
        self
    }

    /// Value must match `pattern`. Absent values are skipped.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error if `pattern` is invalid.
    pub fn matches<F>(
        mut self,
        field: &'static str,
        get: F,
        pattern: &str,
        description: &'static str,
    ) -> Result<Self, regex::Error>
    where
        F: Fn(&R) -> Option<&str> + Send + Sync + 'static,
    {
        let regex = Regex::new(pattern)?;
        self.rules.push(Box::new(move |req| {
            let value = get(req)?;
            (!regex.is_match(value)).then(|| format!("'{field}' must be {description}"))
        }));
        Ok(self)
    }

    /// Arbitrary predicate, typically a cross-field comparison.
    #[must_use]
    pub fn must<F>(mut self, predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let message = message.into();
        self.rules
            .push(Box::new(move |req| (!predicate(req)).then(|| message.clone())));
        self
    }

    /// Evaluates every rule and collects all violations.
    #[must_use]
    pub fn validate(&self, req: &R) -> ValidationResult {
        let errors: Vec<String> = self.rules.iter().filter_map(|rule| rule(req)).collect();
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}
