//! # Provider Modules
//!
//! Backend abstraction for secret storage and access grants.
//!
//! Each backend kind implements [`Provider`]. Instances are created from
//! `ExternalSecretProvider` resources and looked up by name through the
//! [`registry::ProviderRegistry`].
//!
//! Providers record the identifiers of every backend object they create in a
//! [`BackendHandles`] map owned by the caller, one entry at a time, so that a
//! failed or interrupted operation leaves enough state behind to resume or
//! tear down.

use crate::crd::{ExternalSecret, ExternalSecretAccess};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub mod aws;
pub mod registry;

/// Opaque backend identifiers persisted in resource status
pub type BackendHandles = BTreeMap<String, String>;

/// Errors returned by backend providers
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The backend object does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// A create collided with an existing backend object of the same name
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The backend rejected or failed the call
    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    /// The provider configuration could not be decoded or resolved
    #[error("invalid provider configuration: {0}")]
    Config(String),

    /// The declared resource cannot be expressed for this backend
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    pub fn backend(operation: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Capability contract implemented once per backend kind
///
/// Calls are made by at most one reconciliation per resource at a time.
/// Implementations must be safe to call again after any partial failure.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Backend kind tag, e.g. `aws`
    fn kind(&self) -> &'static str;

    /// Create the backend secret and record its handles
    async fn create_secret(
        &self,
        secret: &ExternalSecret,
        value: &str,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError>;

    /// Write a new value to an existing backend secret
    async fn update_secret(
        &self,
        secret: &ExternalSecret,
        value: &str,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError>;

    /// Delete the backend secret
    ///
    /// Returns the purge time when the backend keeps the secret recoverable.
    /// An already absent secret is not an error.
    async fn delete_secret(
        &self,
        secret: &ExternalSecret,
        handles: &BackendHandles,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;

    /// Last time the backend secret changed, if the backend tracks it
    async fn last_changed(
        &self,
        secret: &ExternalSecret,
        handles: &BackendHandles,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;

    /// Grant the subjects of `access` read access to `secret`
    ///
    /// `handles` holds whatever a previous attempt recorded; existing
    /// objects are reused rather than created again.
    async fn create_access(
        &self,
        secret: &ExternalSecret,
        access: &ExternalSecretAccess,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError>;

    /// Replace the grant with the current subjects of `access`
    async fn update_access(
        &self,
        secret: &ExternalSecret,
        access: &ExternalSecretAccess,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError>;

    /// Revoke the grant using recorded handles only
    ///
    /// Objects already absent are skipped.
    async fn delete_access(&self, handles: &BackendHandles) -> Result<(), ProviderError>;
}

/// Annotation workloads need for the grant, if the backend exposes one
pub const SERVICE_ACCOUNT_ANNOTATION_HANDLE: &str = "ServiceAccountAnnotation";
