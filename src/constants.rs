//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group for every resource kind owned by this controller
pub const API_GROUP: &str = "secrets.access-controller.io";

/// Finalizer added on first successful creation and removed after backend teardown
pub const FINALIZER: &str = "secrets.access-controller.io/finalizer";

/// Field manager used for status and metadata patches
pub const FIELD_MANAGER: &str = "secret-access-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Deadline for a single reconciliation, including all backend calls
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;

/// Per-resource exponential backoff for `ExternalSecret` failures
pub const DEFAULT_SECRET_BACKOFF_BASE_SECS: u64 = 10;
pub const DEFAULT_SECRET_BACKOFF_MAX_SECS: u64 = 600;

/// Per-resource exponential backoff for `ExternalSecretAccess` failures
pub const DEFAULT_ACCESS_BACKOFF_BASE_SECS: u64 = 60;
pub const DEFAULT_ACCESS_BACKOFF_MAX_SECS: u64 = 600;

/// Shared retry token bucket across all resources (refill per second, bucket size)
pub const DEFAULT_RETRY_QPS: u32 = 10;
pub const DEFAULT_RETRY_BURST: u32 = 100;

/// Delay before restarting a watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Recheck interval while a deleted provider is still referenced
pub const PROVIDER_IN_USE_REQUEUE_SECS: u64 = 30;

/// Placeholder written to the backend for externally managed secrets
pub const EXTERNAL_SECRET_PLACEHOLDER: &str = "PLACEHOLDER";

/// Status condition types and reasons surfaced to declarers
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_UNAVAILABLE: &str = "Unavailable";
pub const REASON_CREATED: &str = "Created";
pub const REASON_UPDATED: &str = "Updated";
pub const REASON_PROVIDER_ERROR: &str = "ProviderError";
pub const REASON_CONTROLLER_ERROR: &str = "ControllerError";
pub const REASON_CREATION_FAILED: &str = "CreationFailed";
