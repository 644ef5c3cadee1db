//! # Initialization
//!
//! Controller startup: rustls setup, tracing, metrics, server startup,
//! Kubernetes client and the shared reconciler context.

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::ExternalSecretProvider;
use crate::observability;
use crate::provider::registry::{KubeProviderCatalog, ProviderRegistry};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Fails when metrics cannot be registered, the HTTP server does not come
/// up in time, or no Kubernetes client can be built.
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    let config = ControllerConfig::from_env();
    observability::init_tracing(&config.log_format);

    info!("Starting Secret Access Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    check_crds_queryable(&client).await;

    let registry = Arc::new(ProviderRegistry::new(Arc::new(KubeProviderCatalog::new(
        client.clone(),
    ))));
    let reconciler = Arc::new(Reconciler::new(client.clone(), registry, config));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.server_poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log whether the CRDs are installed; the watch loop retries either way
async fn check_crds_queryable(client: &Client) {
    let providers: Api<ExternalSecretProvider> = Api::all(client.clone());
    match providers.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("CRDs are queryable"),
        Err(e) => {
            error!("CRDs are not queryable; {:?}. Are the CRDs installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD check failure - controller will retry");
        }
    }
}
