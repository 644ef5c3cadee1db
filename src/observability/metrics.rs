//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `secret_access_reconciliations_total{kind}` - Reconciliations started
//! - `secret_access_reconciliation_errors_total{kind,reason}` - Failed reconciliations
//! - `secret_access_reconciliation_duration_seconds{kind}` - Reconciliation duration
//! - `secret_access_provider_operations_total{provider,operation}` - Backend calls
//! - `secret_access_provider_operation_duration_seconds{provider,operation}` - Backend call duration
//! - `secret_access_provider_operation_errors_total{provider,operation}` - Failed backend calls
//! - `secret_access_secret_rotations_total` - Random secrets regenerated on schedule
//! - `secret_access_policy_versions_pruned_total` - Permission-document versions deleted
//! - `secret_access_registered_providers` - Providers currently in the registry

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_access_reconciliations_total",
            "Total number of reconciliations by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_access_reconciliation_errors_total",
            "Total number of reconciliation errors by resource kind and reason",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "secret_access_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static PROVIDER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_access_provider_operations_total",
            "Total number of provider operations by provider type and operation",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATIONS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "secret_access_provider_operation_duration_seconds",
            "Duration of provider operations in seconds by provider type and operation",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_DURATION metric - this should never happen")
});

static PROVIDER_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_access_provider_operation_errors_total",
            "Total number of provider operation errors by provider type and operation",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static SECRET_ROTATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_access_secret_rotations_total",
        "Total number of random secrets regenerated on schedule",
    )
    .expect("Failed to create SECRET_ROTATIONS_TOTAL metric - this should never happen")
});

static POLICY_VERSIONS_PRUNED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_access_policy_versions_pruned_total",
        "Total number of non-default permission document versions deleted",
    )
    .expect("Failed to create POLICY_VERSIONS_PRUNED_TOTAL metric - this should never happen")
});

static REGISTERED_PROVIDERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secret_access_registered_providers",
        "Current number of initialized providers in the registry",
    )
    .expect("Failed to create REGISTERED_PROVIDERS metric - this should never happen")
});

/// Register all metrics with the process registry
///
/// # Errors
///
/// Fails if called twice in the same process.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POLICY_VERSIONS_PRUNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REGISTERED_PROVIDERS.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, reason: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, reason])
        .inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

/// Record a completed backend call
pub fn record_provider_operation(provider: &str, operation: &str, duration: f64) {
    PROVIDER_OPERATIONS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
    PROVIDER_OPERATION_DURATION
        .with_label_values(&[provider, operation])
        .observe(duration);
}

pub fn increment_provider_operation_errors(provider: &str, operation: &str) {
    PROVIDER_OPERATION_ERRORS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
}

pub fn increment_secret_rotations() {
    SECRET_ROTATIONS_TOTAL.inc();
}

pub fn increment_policy_versions_pruned(count: usize) {
    POLICY_VERSIONS_PRUNED_TOTAL.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

pub fn set_registered_providers(count: usize) {
    REGISTERED_PROVIDERS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations_by_kind() {
        let before = RECONCILIATIONS_TOTAL.with_label_values(&["ExternalSecret"]).get();
        increment_reconciliations("ExternalSecret");
        let after = RECONCILIATIONS_TOTAL.with_label_values(&["ExternalSecret"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors_by_reason() {
        let labels = ["ExternalSecretAccess", "ProviderError"];
        let before = RECONCILIATION_ERRORS_TOTAL.with_label_values(&labels).get();
        increment_reconciliation_errors(labels[0], labels[1]);
        let after = RECONCILIATION_ERRORS_TOTAL.with_label_values(&labels).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_record_provider_operation() {
        let before = PROVIDER_OPERATIONS_TOTAL
            .with_label_values(&["aws", "create_secret"])
            .get();
        record_provider_operation("aws", "create_secret", 0.2);
        let after = PROVIDER_OPERATIONS_TOTAL
            .with_label_values(&["aws", "create_secret"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_policy_versions_pruned() {
        let before = POLICY_VERSIONS_PRUNED_TOTAL.get();
        increment_policy_versions_pruned(3);
        assert_eq!(POLICY_VERSIONS_PRUNED_TOTAL.get(), before + 3);
    }

    #[test]
    fn test_set_registered_providers() {
        set_registered_providers(2);
        assert_eq!(REGISTERED_PROVIDERS.get(), 2);
    }
}
