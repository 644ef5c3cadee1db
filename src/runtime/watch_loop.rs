//! # Watch Loop
//!
//! Runs one `kube_runtime::Controller` per resource kind and restarts them
//! when their streams end.
//!
//! kube-runtime never runs two reconciliations of the same object at once;
//! different objects reconcile in parallel.

use crate::controller::reconciler::{
    reconcile_access, reconcile_provider, reconcile_secret, Reconciler, ReconcilerError,
};
use crate::controller::server::ServerState;
use crate::crd::{ExternalSecret, ExternalSecretAccess, ExternalSecretProvider};
use crate::runtime::error_policy::{
    access_error_policy, classify_watch_error, provider_error_policy, secret_error_policy,
    WatchErrorAction,
};
use futures::StreamExt;
use kube::api::Api;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run all controllers until a shutdown signal arrives
///
/// # Errors
///
/// Currently never fails; the signature leaves room for startup checks.
pub async fn run_watch_loop(
    ctx: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let restart_delay = ctx.config.watch_restart_delay();

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_state.set_ready(false);
    });

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let (secrets, accesses) = namespaced_apis(&ctx);
        let providers: Api<ExternalSecretProvider> = Api::all(ctx.client.clone());

        info!(
            namespace = ctx.config.watch_namespace.as_deref().unwrap_or("*"),
            "Starting controllers"
        );

        let secret_controller =
            Controller::new(secrets.clone(), watcher::Config::default().any_semantic())
                .shutdown_on_signal()
                .run(reconcile_secret, secret_error_policy, Arc::clone(&ctx))
                .for_each(|res| drain(res, restart_delay));

        let access_controller =
            Controller::new(accesses, watcher::Config::default().any_semantic());
        let access_store = access_controller.store();
        let access_controller = access_controller
            .watches(
                secrets,
                watcher::Config::default().any_semantic(),
                move |secret: ExternalSecret| {
                    let namespace = secret.namespace();
                    let name = secret.name_any();
                    access_store
                        .state()
                        .into_iter()
                        .filter(|a| a.spec.secret_name == name && a.namespace() == namespace)
                        .map(|a| ObjectRef::from_obj(a.as_ref()))
                        .collect::<Vec<_>>()
                },
            )
            .shutdown_on_signal()
            .run(reconcile_access, access_error_policy, Arc::clone(&ctx))
            .for_each(|res| drain(res, restart_delay));

        let provider_controller =
            Controller::new(providers, watcher::Config::default().any_semantic())
                .shutdown_on_signal()
                .run(reconcile_provider, provider_error_policy, Arc::clone(&ctx))
                .for_each(|res| drain(res, restart_delay));

        tokio::join!(secret_controller, access_controller, provider_controller);

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch streams ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

fn namespaced_apis(ctx: &Reconciler) -> (Api<ExternalSecret>, Api<ExternalSecretAccess>) {
    match &ctx.config.watch_namespace {
        Some(namespace) => (
            Api::namespaced(ctx.client.clone(), namespace),
            Api::namespaced(ctx.client.clone(), namespace),
        ),
        None => (Api::all(ctx.client.clone()), Api::all(ctx.client.clone())),
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn drain<K: Resource>(
    result: Result<(ObjectRef<K>, Action), controller::Error<ReconcilerError, watcher::Error>>,
    restart_delay: Duration,
) {
    match result {
        Ok((object, action)) => {
            debug!(resource.name = %object.name, ?action, "watch.event.success");
        }
        // Already handled by the error policy
        Err(controller::Error::ReconcilerFailed(error, object)) => {
            debug!(resource.name = %object.name, error = %error, "watch.event.failed");
        }
        Err(e) => {
            if let WatchErrorAction::Pause(delay) =
                classify_watch_error(&format!("{e:?}"), restart_delay)
            {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
