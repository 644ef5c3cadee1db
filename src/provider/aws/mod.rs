//! # AWS Provider
//!
//! Stores secrets in AWS Secrets Manager and grants access through IAM roles.
//!
//! This module provides functionality to:
//! - Create, update and delete secrets in Secrets Manager
//! - Report the backend's last-changed date for drift detection
//! - Grant read access to service accounts (IRSA) and foreign IAM principals
//!
//! Backend handles recorded on resources:
//! - secrets: `SecretArn`, `KmsKeyArn`
//! - accesses: `PolicyArn`, `RoleName`, `RoleArn`, `ServiceAccountAnnotation`

use crate::crd::{AwsProviderConfig, ExternalSecret, ExternalSecretAccess};
use crate::observability::metrics;
use crate::provider::{BackendHandles, Provider, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

pub mod auth;
pub mod client;
pub mod iam;
pub mod policy;
pub mod secrets;

pub use client::{IamApi, PolicyVersion, SdkIam, SdkSecrets, SecretDescription, SecretsApi};
pub use iam::{AccessSettings, MAX_POLICY_VERSIONS};

pub const SECRET_ARN: &str = "SecretArn";
pub const KMS_KEY_ARN: &str = "KmsKeyArn";
pub const POLICY_ARN: &str = "PolicyArn";
pub const ROLE_NAME: &str = "RoleName";
pub const ROLE_ARN: &str = "RoleArn";

pub const DEFAULT_RESOURCE_PREFIX: &str = "sac";

const PROVIDER_KIND: &str = "aws";

/// AWS provider implementation
pub struct AwsProvider {
    iam: Arc<dyn IamApi>,
    secrets: Arc<dyn SecretsApi>,
    settings: AccessSettings,
}

impl std::fmt::Debug for AwsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsProvider")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AwsProvider {
    /// Build a provider from declared configuration using SDK clients
    ///
    /// # Errors
    ///
    /// `Config` when the OIDC provider cannot be resolved.
    pub async fn from_config(config: &AwsProviderConfig) -> Result<Self, ProviderError> {
        let sdk_config = auth::load_sdk_config(config).await;
        let oidc = auth::resolve_oidc_provider(config, &sdk_config).await?;

        info!(
            region = ?sdk_config.region().map(ToString::to_string),
            oidc.provider = ?oidc.as_ref().map(|o| o.arn.as_str()),
            "Initialized AWS provider"
        );

        Ok(Self::with_clients(
            Arc::new(SdkIam::new(aws_sdk_iam::Client::new(&sdk_config))),
            Arc::new(SdkSecrets::new(aws_sdk_secretsmanager::Client::new(
                &sdk_config,
            ))),
            AccessSettings {
                resource_prefix: config
                    .resource_prefix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RESOURCE_PREFIX.to_string()),
                oidc,
            },
        ))
    }

    /// Build a provider over arbitrary API implementations
    #[must_use]
    pub fn with_clients(
        iam: Arc<dyn IamApi>,
        secrets: Arc<dyn SecretsApi>,
        settings: AccessSettings,
    ) -> Self {
        Self {
            iam,
            secrets,
            settings,
        }
    }

    /// Run one backend operation with a span, timing and error metrics
    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let span = info_span!("aws.provider", operation, prefix = %self.settings.resource_prefix);
        let start = Instant::now();

        let result = fut.instrument(span).await;

        metrics::record_provider_operation(PROVIDER_KIND, operation, start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::increment_provider_operation_errors(PROVIDER_KIND, operation);
        }
        result
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn kind(&self) -> &'static str {
        PROVIDER_KIND
    }

    async fn create_secret(
        &self,
        secret: &ExternalSecret,
        value: &str,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        self.observe(
            "create_secret",
            secrets::create_secret(self.secrets.as_ref(), secret, value, handles),
        )
        .await
    }

    async fn update_secret(
        &self,
        secret: &ExternalSecret,
        value: &str,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        self.observe(
            "update_secret",
            secrets::update_secret(self.secrets.as_ref(), secret, value, handles),
        )
        .await
    }

    async fn delete_secret(
        &self,
        secret: &ExternalSecret,
        handles: &BackendHandles,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        self.observe(
            "delete_secret",
            secrets::delete_secret(self.secrets.as_ref(), secret, handles),
        )
        .await
    }

    async fn last_changed(
        &self,
        secret: &ExternalSecret,
        handles: &BackendHandles,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        self.observe(
            "last_changed",
            secrets::last_changed(self.secrets.as_ref(), secret, handles),
        )
        .await
    }

    async fn create_access(
        &self,
        secret: &ExternalSecret,
        access: &ExternalSecretAccess,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        self.observe(
            "create_access",
            iam::create_access(self.iam.as_ref(), &self.settings, secret, access, handles),
        )
        .await
    }

    async fn update_access(
        &self,
        secret: &ExternalSecret,
        access: &ExternalSecretAccess,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        self.observe(
            "update_access",
            iam::update_access(self.iam.as_ref(), &self.settings, secret, access, handles),
        )
        .await
    }

    async fn delete_access(&self, handles: &BackendHandles) -> Result<(), ProviderError> {
        self.observe("delete_access", iam::delete_access(self.iam.as_ref(), handles))
            .await
    }
}
