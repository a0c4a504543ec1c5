//! Init-time registry mapping each request type to its handler, rule set and
//! cache invalidation scope.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use projectdesk_core::{CachePattern, Command, Query, Request, RequestKind, RuleSet, ValidationResult};

use super::handler::{ErasedHandler, Handler, TypedHandler};

type ErasedRules = Box<dyn Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<ValidationResult> + Send + Sync>;
type ErasedScope = Box<
    dyn Fn(&(dyn Any + Send + Sync), &(dyn Any + Send)) -> anyhow::Result<Vec<CachePattern>>
        + Send
        + Sync,
>;
type Scope<R> = Box<dyn Fn(&R, &<R as Request>::Output) -> Vec<CachePattern> + Send + Sync>;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Everything the pipeline knows about one request type.
pub struct Registration {
    name: &'static str,
    kind: RequestKind,
    rules: ErasedRules,
    scope: Option<ErasedScope>,
    handler: Box<dyn ErasedHandler>,
}

impl Registration {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Evaluate the registered rule set against `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is not the registered request type.
    pub fn validate(&self, payload: &(dyn Any + Send + Sync)) -> anyhow::Result<ValidationResult> {
        (self.rules)(payload)
    }

    /// Cache patterns a successful execution makes stale.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` or `output` have the wrong type.
    pub fn invalidation_patterns(
        &self,
        payload: &(dyn Any + Send + Sync),
        output: &(dyn Any + Send),
    ) -> anyhow::Result<Vec<CachePattern>> {
        match &self.scope {
            Some(scope) => scope(payload, output),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn handler(&self) -> &dyn ErasedHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("invalidates", &self.scope.is_some())
            .finish_non_exhaustive()
    }
}

fn erase_rules<R: Request>(rules: RuleSet<R>) -> ErasedRules {
    Box::new(move |payload| {
        let request = downcast_request::<R>(payload)?;
        Ok(rules.validate(request))
    })
}

fn downcast_request<R: Request>(payload: &(dyn Any + Send + Sync)) -> anyhow::Result<&R> {
    payload
        .downcast_ref::<R>()
        .ok_or_else(|| anyhow::anyhow!("payload is not a {}", R::NAME))
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Registration builder for a mutating request.
pub struct CommandRegistration<R: Command> {
    handler: Box<dyn ErasedHandler>,
    rules: RuleSet<R>,
    scope: Option<Scope<R>>,
}

impl<R: Command> CommandRegistration<R> {
    #[must_use]
    pub fn new<H: Handler<R>>(handler: H) -> Self {
        Self {
            handler: Box::new(TypedHandler::<R, H>::new(handler)),
            rules: RuleSet::new(),
            scope: None,
        }
    }

    #[must_use]
    pub fn rules(mut self, rules: RuleSet<R>) -> Self {
        self.rules = rules;
        self
    }

    /// Declare the cache patterns evicted after this command commits.
    ///
    /// The closure sees the request and the handler's success value, so it can
    /// name keys that only exist after the handler ran (a generated id, the
    /// parent of a removed child).
    #[must_use]
    pub fn invalidates<F>(mut self, scope: F) -> Self
    where
        F: Fn(&R, &R::Output) -> Vec<CachePattern> + Send + Sync + 'static,
    {
        self.scope = Some(Box::new(scope));
        self
    }

    fn build(self) -> Registration {
        let scope = self.scope.map(|scope| -> ErasedScope {
            Box::new(move |payload, output| {
                let request = downcast_request::<R>(payload)?;
                let output = output
                    .downcast_ref::<R::Output>()
                    .ok_or_else(|| anyhow::anyhow!("unexpected output type for {}", R::NAME))?;
                Ok(scope(request, output))
            })
        });
        Registration {
            name: R::NAME,
            kind: RequestKind::Mutating,
            rules: erase_rules(self.rules),
            scope,
            handler: self.handler,
        }
    }
}

/// Registration builder for a read-only request.
pub struct QueryRegistration<R: Query> {
    handler: Box<dyn ErasedHandler>,
    rules: RuleSet<R>,
}

impl<R: Query> QueryRegistration<R> {
    #[must_use]
    pub fn new<H: Handler<R>>(handler: H) -> Self {
        Self {
            handler: Box::new(TypedHandler::<R, H>::new(handler)),
            rules: RuleSet::new(),
        }
    }

    #[must_use]
    pub fn rules(mut self, rules: RuleSet<R>) -> Self {
        self.rules = rules;
        self
    }

    fn build(self) -> Registration {
        Registration {
            name: R::NAME,
            kind: RequestKind::Query,
            rules: erase_rules(self.rules),
            scope: None,
            handler: self.handler,
        }
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Errors raised while populating the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a handler for '{name}' is already registered")]
    Duplicate { name: &'static str },
}

/// Request type -> registration, resolved by exact type match.
///
/// Built once at start-up and then shared read-only by the dispatcher.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    by_type: HashMap<TypeId, Arc<Registration>>,
    order: Vec<&'static str>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mutating request.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Duplicate` if `R` already has a handler.
    pub fn register_command<R: Command>(
        &mut self,
        registration: CommandRegistration<R>,
    ) -> Result<(), RegistryError> {
        if registration.scope.is_none() {
            tracing::warn!(request = R::NAME, "command registered without cache invalidation");
        }
        self.insert::<R>(registration.build())
    }

    /// Register a read-only request.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Duplicate` if `R` already has a handler.
    pub fn register_query<R: Query>(
        &mut self,
        registration: QueryRegistration<R>,
    ) -> Result<(), RegistryError> {
        self.insert::<R>(registration.build())
    }

    fn insert<R: Request>(&mut self, registration: Registration) -> Result<(), RegistryError> {
        let type_id = TypeId::of::<R>();
        if self.by_type.contains_key(&type_id) {
            return Err(RegistryError::Duplicate { name: R::NAME });
        }
        self.by_type.insert(type_id, Arc::new(registration));
        self.order.push(R::NAME);
        Ok(())
    }

    /// Look up the registration for request type `R`.
    #[must_use]
    pub fn get<R: Request>(&self) -> Option<Arc<Registration>> {
        self.by_type.get(&TypeId::of::<R>()).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Registered request names in registration order.
    #[must_use]
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
