//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_ACCESS_BACKOFF_BASE_SECS, DEFAULT_ACCESS_BACKOFF_MAX_SECS, DEFAULT_METRICS_PORT,
    DEFAULT_RECONCILE_TIMEOUT_SECS, DEFAULT_RETRY_BURST, DEFAULT_RETRY_QPS,
    DEFAULT_SECRET_BACKOFF_BASE_SECS, DEFAULT_SECRET_BACKOFF_MAX_SECS,
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long to wait for the HTTP server to bind before giving up
    pub server_startup_timeout_secs: u64,
    /// Poll interval while waiting for the HTTP server
    pub server_poll_interval_ms: u64,
    /// Deadline for one reconciliation, backend calls included
    pub reconcile_timeout_secs: u64,
    /// Exponential backoff for failed `ExternalSecret` reconciliations
    pub secret_backoff_base_secs: u64,
    pub secret_backoff_max_secs: u64,
    /// Exponential backoff for failed `ExternalSecretAccess` reconciliations
    pub access_backoff_base_secs: u64,
    pub access_backoff_max_secs: u64,
    /// Shared retry budget across all resources
    pub retry_qps: u32,
    pub retry_burst: u32,
    /// Delay before restarting a watch stream that ended
    pub watch_restart_delay_secs: u64,
    /// Restrict watches to one namespace; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Periodic requeue after success; 0 waits for the next change event
    pub default_requeue_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            secret_backoff_base_secs: DEFAULT_SECRET_BACKOFF_BASE_SECS,
            secret_backoff_max_secs: DEFAULT_SECRET_BACKOFF_MAX_SECS,
            access_backoff_base_secs: DEFAULT_ACCESS_BACKOFF_BASE_SECS,
            access_backoff_max_secs: DEFAULT_ACCESS_BACKOFF_MAX_SECS,
            retry_qps: DEFAULT_RETRY_QPS,
            retry_burst: DEFAULT_RETRY_BURST,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_namespace: None,
            default_requeue_secs: 0,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Split out from `from_env` so parsing can be tested without touching
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            server_startup_timeout_secs: parse_or(
                &lookup,
                "SERVER_STARTUP_TIMEOUT_SECS",
                defaults.server_startup_timeout_secs,
            ),
            server_poll_interval_ms: parse_or(
                &lookup,
                "SERVER_POLL_INTERVAL_MS",
                defaults.server_poll_interval_ms,
            ),
            reconcile_timeout_secs: parse_or(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout_secs,
            ),
            secret_backoff_base_secs: parse_or(
                &lookup,
                "SECRET_BACKOFF_BASE_SECS",
                defaults.secret_backoff_base_secs,
            ),
            secret_backoff_max_secs: parse_or(
                &lookup,
                "SECRET_BACKOFF_MAX_SECS",
                defaults.secret_backoff_max_secs,
            ),
            access_backoff_base_secs: parse_or(
                &lookup,
                "ACCESS_BACKOFF_BASE_SECS",
                defaults.access_backoff_base_secs,
            ),
            access_backoff_max_secs: parse_or(
                &lookup,
                "ACCESS_BACKOFF_MAX_SECS",
                defaults.access_backoff_max_secs,
            ),
            retry_qps: parse_or(&lookup, "RETRY_QPS", defaults.retry_qps),
            retry_burst: parse_or(&lookup, "RETRY_BURST", defaults.retry_burst),
            watch_restart_delay_secs: parse_or(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            default_requeue_secs: parse_or(
                &lookup,
                "DEFAULT_REQUEUE_SECS",
                defaults.default_requeue_secs,
            ),
            log_format: lookup("LOG_FORMAT")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_format),
        }
    }

    /// Get reconciliation deadline
    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Requeue interval after a successful reconciliation, if any
    #[must_use]
    pub fn success_requeue(&self) -> Option<Duration> {
        (self.default_requeue_secs > 0).then(|| Duration::from_secs(self.default_requeue_secs))
    }
}

/// Read a value from the lookup or return the default if missing or malformed
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
