/// Pipeline-level configuration.
///
/// Controls operation timeouts, concurrency limits, slow-request reporting
/// and background cache maintenance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Operations slower than this are logged and counted as slow. They still succeed.
    pub slow_request_threshold_ms: u64,
    /// Interval between expired-entry sweeps of the in-memory cache.
    pub cache_sweep_interval_ms: u64,
    /// Page size used by list queries that do not specify one.
    pub default_page_size: u32,
    /// Upper bound for requested page sizes.
    pub max_page_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            slow_request_threshold_ms: 500,
            cache_sweep_interval_ms: 60_000,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}
