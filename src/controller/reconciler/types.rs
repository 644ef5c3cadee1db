//! # Reconciler Types
//!
//! Shared context and error type for every reconciler.

use crate::config::ControllerConfig;
use crate::constants::{REASON_CONTROLLER_ERROR, REASON_PROVIDER_ERROR};
use crate::controller::backoff::{ExponentialBackoff, RetryLimiter, TokenBucket};
use crate::controller::rotation::{
    NaturalLanguageParser, PatternError, RotationExpressionError, TimeExpressionParser,
};
use crate::provider::registry::{ProviderRegistry, RegistryError};
use crate::provider::ProviderError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Failure of a single reconciliation
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// The backend rejected or failed an operation
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A local precondition or validation failed
    #[error("{0}")]
    Controller(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("reconciliation did not finish within {0:?}")]
    Timeout(Duration),
}

impl ReconcilerError {
    /// Status condition reason for this error
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Provider(ProviderError::Config(_) | ProviderError::InvalidRequest(_))
            | Self::Controller(_)
            | Self::Kube(_) => REASON_CONTROLLER_ERROR,
            Self::Provider(_) | Self::Timeout(_) => REASON_PROVIDER_ERROR,
        }
    }
}

impl From<RegistryError> for ReconcilerError {
    fn from(e: RegistryError) -> Self {
        Self::Controller(e.to_string())
    }
}

impl From<PatternError> for ReconcilerError {
    fn from(e: PatternError) -> Self {
        Self::Controller(e.to_string())
    }
}

impl From<RotationExpressionError> for ReconcilerError {
    fn from(e: RotationExpressionError) -> Self {
        Self::Controller(e.to_string())
    }
}

/// Context shared by the secret, access and provider controllers
pub struct Reconciler {
    pub client: kube::Client,
    pub registry: Arc<ProviderRegistry>,
    pub config: ControllerConfig,
    pub parser: Arc<dyn TimeExpressionParser>,
    pub secret_limiter: RetryLimiter,
    pub access_limiter: RetryLimiter,
    pub provider_limiter: RetryLimiter,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build the context; all three limiters draw from one token bucket
    #[must_use]
    pub fn new(
        client: kube::Client,
        registry: Arc<ProviderRegistry>,
        config: ControllerConfig,
    ) -> Self {
        let bucket = Arc::new(Mutex::new(TokenBucket::new(
            config.retry_qps,
            config.retry_burst,
        )));
        let secret_backoff = ExponentialBackoff::new(
            Duration::from_secs(config.secret_backoff_base_secs),
            Duration::from_secs(config.secret_backoff_max_secs),
        );
        let access_backoff = ExponentialBackoff::new(
            Duration::from_secs(config.access_backoff_base_secs),
            Duration::from_secs(config.access_backoff_max_secs),
        );

        Self {
            client,
            registry,
            secret_limiter: RetryLimiter::new(secret_backoff, Arc::clone(&bucket)),
            access_limiter: RetryLimiter::new(access_backoff, Arc::clone(&bucket)),
            provider_limiter: RetryLimiter::new(secret_backoff, bucket),
            parser: Arc::new(NaturalLanguageParser),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_classification() {
        assert_eq!(
            ReconcilerError::Provider(ProviderError::backend("PutSecretValue", "throttled"))
                .reason(),
            REASON_PROVIDER_ERROR
        );
        assert_eq!(
            ReconcilerError::Provider(ProviderError::InvalidRequest("window".into())).reason(),
            REASON_CONTROLLER_ERROR
        );
        assert_eq!(
            ReconcilerError::Controller("secret not ready".into()).reason(),
            REASON_CONTROLLER_ERROR
        );
        assert_eq!(
            ReconcilerError::Timeout(Duration::from_secs(1)).reason(),
            REASON_PROVIDER_ERROR
        );
    }

    #[test]
    fn test_registry_errors_are_controller_errors() {
        let err: ReconcilerError = RegistryError::NotRegistered("aws-main".into()).into();
        assert_eq!(err.reason(), REASON_CONTROLLER_ERROR);
        assert!(err.to_string().contains("aws-main"));
    }
}
