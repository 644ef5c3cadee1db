//! # Provider Registry
//!
//! Concurrent name → provider map, populated lazily from the declared
//! `ExternalSecretProvider` resources on first lookup and kept current by the
//! provider reconciler afterwards.

use crate::crd::{AwsProviderConfig, ExternalSecretProvider, ProviderKind};
use crate::observability::metrics;
use crate::provider::aws::AwsProvider;
use crate::provider::{Provider, ProviderError};
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

/// Errors returned by registry lookups
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{0}' is not registered")]
    NotRegistered(String),

    #[error("failed to list declared providers: {0}")]
    Catalog(String),
}

/// Source of declared provider resources and the factory that turns them
/// into live providers
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    async fn list_declared(&self) -> Result<Vec<ExternalSecretProvider>, RegistryError>;

    async fn instantiate(
        &self,
        declared: &ExternalSecretProvider,
    ) -> Result<Arc<dyn Provider>, ProviderError>;
}

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    initialized: OnceCell<()>,
    catalog: Arc<dyn ProviderCatalog>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("initialized", &self.initialized.initialized())
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            initialized: OnceCell::new(),
            catalog,
        }
    }

    /// Look up a provider by name
    ///
    /// The first lookup that misses on an empty registry runs one
    /// initialization pass from the catalog; concurrent callers wait for
    /// that same pass.
    ///
    /// # Errors
    ///
    /// `NotRegistered` when no provider has that name, `Catalog` when the
    /// declared providers could not be listed.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        if let Some(provider) = self.lookup(name).await {
            return Ok(provider);
        }

        // Waits for an initialization already in progress
        if !self.initialized.initialized() {
            self.initialized
                .get_or_try_init(|| async {
                    // Providers loaded by the provider reconciler count as populated
                    if self.providers.read().await.is_empty() {
                        self.initialize_all().await?;
                    }
                    Ok::<(), RegistryError>(())
                })
                .await?;
        }

        self.lookup(name)
            .await
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Add or replace a provider
    pub async fn register(&self, name: &str, provider: Arc<dyn Provider>) {
        let mut providers = self.providers.write().await;
        providers.insert(name.to_string(), provider);
        metrics::set_registered_providers(providers.len());
    }

    /// Remove a provider, returning whether it was present
    pub async fn remove(&self, name: &str) -> bool {
        let mut providers = self.providers.write().await;
        let removed = providers.remove(name).is_some();
        metrics::set_registered_providers(providers.len());
        removed
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Instantiate and register every declared provider
    ///
    /// A provider with invalid configuration is skipped; the others are
    /// still registered. Returns the number registered by this pass.
    ///
    /// # Errors
    ///
    /// Only listing failures abort the pass.
    pub async fn initialize_all(&self) -> Result<usize, RegistryError> {
        let declared = self.catalog.list_declared().await?;
        let mut registered = 0;

        for resource in &declared {
            let name = resource.name_any();
            match self.catalog.instantiate(resource).await {
                Ok(provider) => {
                    self.register(&name, provider).await;
                    registered += 1;
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Skipping provider that failed to initialize");
                }
            }
        }

        info!(
            declared = declared.len(),
            registered, "Provider registry initialized"
        );
        Ok(registered)
    }

    /// Instantiate one declared provider and register it under its name,
    /// replacing any previous instance
    ///
    /// # Errors
    ///
    /// `Config` when the declaration cannot be turned into a provider; the
    /// previous instance, if any, stays registered.
    pub async fn load(&self, declared: &ExternalSecretProvider) -> Result<(), ProviderError> {
        let provider = self.catalog.instantiate(declared).await?;
        self.register(&declared.name_any(), provider).await;
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().await.get(name).cloned()
    }
}

/// Catalog backed by the Kubernetes API
pub struct KubeProviderCatalog {
    api: Api<ExternalSecretProvider>,
}

impl std::fmt::Debug for KubeProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeProviderCatalog").finish_non_exhaustive()
    }
}

impl KubeProviderCatalog {
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ProviderCatalog for KubeProviderCatalog {
    async fn list_declared(&self) -> Result<Vec<ExternalSecretProvider>, RegistryError> {
        self.api
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| RegistryError::Catalog(e.to_string()))
    }

    async fn instantiate(
        &self,
        declared: &ExternalSecretProvider,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        instantiate_provider(declared).await
    }
}

/// Build a live provider from its declaration
///
/// # Errors
///
/// `Config` for an unknown kind or undecodable configuration.
pub async fn instantiate_provider(
    declared: &ExternalSecretProvider,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let kind = ProviderKind::parse(&declared.spec.provider).map_err(ProviderError::Config)?;
    match kind {
        ProviderKind::Aws => {
            let config =
                AwsProviderConfig::from_map(&declared.spec.config).map_err(ProviderError::Config)?;
            let provider = AwsProvider::from_config(&config).await?;
            Ok(Arc::new(provider))
        }
    }
}
