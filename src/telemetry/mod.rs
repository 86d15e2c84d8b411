//! Structured logging initialization. Metrics/tracing export (OpenTelemetry,
//! Prometheus) are out of scope for this service; `/metrics` exposes a
//! minimal liveness-oriented stub rather than a scrape endpoint.

use crate::config::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialises the global `tracing` subscriber: an env filter (defaulting to
/// `info` for this crate, `debug` for request tracing) plus either plain or
/// JSON formatting depending on `MPO_AUTHN_LOG_FORMAT`.
pub fn init(config: &TelemetryConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mpo_authn_server=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format_json {
        let fmt_layer = tracing_subscriber::fmt::layer().json().flatten_event(true);
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer();
        registry.with(fmt_layer).init();
    }
}
