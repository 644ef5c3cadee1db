//! # Observability
//!
//! Prometheus metrics collection and tracing setup.

pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. `format` selects `json` or
/// human-readable text output.
pub fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "secret_access_controller=info,kube_runtime=warn".into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().with_current_span(true).init();
    } else {
        builder.with_target(true).init();
    }
}
