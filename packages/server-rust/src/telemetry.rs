//! Tracing subscriber and metrics exporter set-up for the binary.

use std::net::SocketAddr;

use anyhow::Context as _;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event, span fields included.
    Json,
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_directives`.
///
/// # Errors
///
/// Returns an error if the directives do not parse or a global subscriber is
/// already installed.
pub fn init_tracing(format: LogFormat, default_directives: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives)
            .with_context(|| format!("invalid log directives '{default_directives}'"))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    }
    .map_err(|err| anyhow::anyhow!("installing tracing subscriber: {err}"))
}

/// Install the global `metrics` recorder and serve Prometheus text on `addr`.
///
/// Must be called from inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be set up.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("starting metrics exporter on {addr}"))
}
