//! # Error Policy
//!
//! Retry scheduling for failed reconciliations and classification of watch
//! stream errors.

use crate::controller::backoff::RetryLimiter;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::{ExternalSecret, ExternalSecretAccess, ExternalSecretProvider};
use crate::observability::metrics;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff key for a resource: `namespace/name`, or `name` when cluster-scoped
#[must_use]
pub fn resource_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(namespace) => format!("{}/{}", namespace, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Record the failure and compute the retry delay for `obj`
pub fn handle_reconciliation_error<K: Resource>(
    obj: &K,
    kind: &str,
    error: &ReconcilerError,
    limiter: &RetryLimiter,
) -> Action {
    let key = resource_key(obj);
    let _error_guard = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        resource.kind = kind,
        resource.key = key.as_str(),
        reason = error.reason(),
    )
    .entered();

    error!(error = %error, "Reconciliation failed");
    metrics::increment_reconciliation_errors(kind, error.reason());

    let delay = limiter.next_delay(&key);
    info!(
        retry_in_secs = delay.as_secs_f64(),
        failures = limiter.failures(&key),
        "Retrying with backoff"
    );
    Action::requeue(delay)
}

pub fn secret_error_policy(
    obj: Arc<ExternalSecret>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    handle_reconciliation_error(obj.as_ref(), "ExternalSecret", error, &ctx.secret_limiter)
}

pub fn access_error_policy(
    obj: Arc<ExternalSecretAccess>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    handle_reconciliation_error(
        obj.as_ref(),
        "ExternalSecretAccess",
        error,
        &ctx.access_limiter,
    )
}

pub fn provider_error_policy(
    obj: Arc<ExternalSecretProvider>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    handle_reconciliation_error(
        obj.as_ref(),
        "ExternalSecretProvider",
        error,
        &ctx.provider_limiter,
    )
}

/// How the watch loop should react to a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorAction {
    /// Expected noise; keep consuming the stream
    Continue,
    /// Wait this long, then keep consuming
    Pause(Duration),
}

/// Classify a controller stream error by its rendered text
#[must_use]
pub fn classify_watch_error(error_string: &str, restart_delay: Duration) -> WatchErrorAction {
    // 404 first: plain-text 404 bodies surface as serde errors mentioning other codes
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");

    if is_401 {
        error!(
            "Watch authentication failed (401 Unauthorized) - check the controller's ClusterRole and ServiceAccount token"
        );
        WatchErrorAction::Pause(restart_delay)
    } else if is_410 {
        warn!("Watch resource version expired (410), the watcher will relist");
        WatchErrorAction::Continue
    } else if is_not_found {
        warn!(
            "Watched object not found (404) - normal after deletion, otherwise check the CRDs are installed. Error: {}",
            error_string
        );
        WatchErrorAction::Continue
    } else {
        warn!("Controller stream error: {}", error_string);
        WatchErrorAction::Pause(restart_delay)
    }
}
