/// Caller identity and tracing information attached to a request.
/// Threaded through the pipeline for audit fields and log correlation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated user issuing the request, if any.
    pub actor: Option<String>,
    /// Organization scope of the request. `None` for single-tenant deployments.
    pub organization_id: Option<String>,
    /// Correlation identifier propagated from the caller (e.g. an HTTP request id).
    pub trace_id: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn for_actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}
