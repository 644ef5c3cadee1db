//! # Provider Reconciler
//!
//! Keeps the registry in step with `ExternalSecretProvider` resources:
//! applied declarations are (re)instantiated and registered, deleted ones
//! are removed once nothing references them anymore.
//!
//! Secrets and accesses tear down their backend objects through the
//! registry, so a provider stays registered (and keeps its finalizer) while
//! any of them still points at it.

use super::finalizer;
use super::types::{Reconciler, ReconcilerError};
use crate::constants::PROVIDER_IN_USE_REQUEUE_SECS;
use crate::crd::{ExternalSecret, ExternalSecretAccess, ExternalSecretProvider};
use crate::observability::metrics;
use kube::api::{Api, ListParams};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument};

pub const KIND: &str = "ExternalSecretProvider";

/// Controller entry point for `ExternalSecretProvider`
///
/// # Errors
///
/// `Provider(Config)` when the declaration is invalid, `Kube` when the
/// finalizer cannot be updated or dependents cannot be listed.
pub async fn reconcile_provider(
    obj: Arc<ExternalSecretProvider>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let span = info_span!(
        "reconcile",
        resource.kind = KIND,
        resource.name = %name,
        provider.kind = %obj.spec.provider,
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(KIND);
        let api: Api<ExternalSecretProvider> = Api::all(ctx.client.clone());

        let result = if obj.metadata.deletion_timestamp.is_some() {
            finalize(&api, &obj, &ctx).await
        } else {
            finalizer::add(&api, obj.as_ref()).await?;
            ctx.registry.load(&obj).await?;
            info!("Registered provider");
            Ok(Action::await_change())
        };

        metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.provider_limiter.forget(&name);
        }
        result
    }
    .instrument(span)
    .await
}

async fn finalize(
    api: &Api<ExternalSecretProvider>,
    obj: &ExternalSecretProvider,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    if !finalizer::has_finalizer(obj) {
        return Ok(Action::await_change());
    }

    let name = obj.name_any();
    let (secrets, accesses) = match &ctx.config.watch_namespace {
        Some(namespace) => (
            Api::<ExternalSecret>::namespaced(ctx.client.clone(), namespace),
            Api::<ExternalSecretAccess>::namespaced(ctx.client.clone(), namespace),
        ),
        None => (Api::all(ctx.client.clone()), Api::all(ctx.client.clone())),
    };
    let secrets = secrets.list(&ListParams::default()).await?.items;
    let accesses = accesses.list(&ListParams::default()).await?.items;

    let blocking = dependents(&name, &secrets, &accesses);
    if !blocking.is_empty() {
        info!(
            dependents = blocking.len(),
            first = %blocking[0],
            "Provider is still referenced, keeping it registered"
        );
        return Ok(Action::requeue(Duration::from_secs(
            PROVIDER_IN_USE_REQUEUE_SECS,
        )));
    }

    if ctx.registry.remove(&name).await {
        info!("Unregistered provider");
    }
    finalizer::remove(api, obj).await?;
    Ok(Action::await_change())
}

/// Resources that still need the provider called `name`
///
/// Secrets reference it by `spec.provider`; accesses by the provider name
/// recorded when their grant was created.
#[must_use]
pub fn dependents(
    name: &str,
    secrets: &[ExternalSecret],
    accesses: &[ExternalSecretAccess],
) -> Vec<String> {
    let secrets = secrets
        .iter()
        .filter(|s| s.spec.provider == name)
        .map(|s| format!("ExternalSecret {}", qualified(s)));
    let accesses = accesses
        .iter()
        .filter(|a| a.status.as_ref().is_some_and(|s| s.provider_type == name))
        .map(|a| format!("ExternalSecretAccess {}", qualified(a)));
    secrets.chain(accesses).collect()
}

fn qualified<K: ResourceExt>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}
