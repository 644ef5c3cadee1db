//! # Access Reconciler
//!
//! Provisions and revokes the backend grant behind an `ExternalSecretAccess`.
//!
//! The grant is only created once the target secret reports `created`.
//! Teardown relies on the handles recorded in status alone, since the target
//! secret may already be gone.

use super::finalizer;
use super::status::{patch_status, record_failure, record_success, Change};
use super::types::{Reconciler, ReconcilerError};
use crate::crd::{ExternalSecret, ExternalSecretAccess, ExternalSecretAccessStatus};
use crate::observability::metrics;
use crate::provider::{Provider, SERVICE_ACCOUNT_ANNOTATION_HANDLE};
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const KIND: &str = "ExternalSecretAccess";

/// State machine for one grant against one provider
#[derive(Debug)]
pub struct AccessLifecycle<'a> {
    provider: &'a dyn Provider,
}

impl<'a> AccessLifecycle<'a> {
    #[must_use]
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self { provider }
    }

    /// Create the grant, or replace it when the subjects or the target
    /// secret changed
    ///
    /// # Errors
    ///
    /// `Controller` when the target secret is not created yet or the subjects
    /// are invalid, `Provider` for backend failures.
    pub async fn apply(
        &self,
        secret: &ExternalSecret,
        access: &ExternalSecretAccess,
        status: &mut ExternalSecretAccessStatus,
    ) -> Result<Change, ReconcilerError> {
        ensure_secret_ready(secret)?;
        access
            .spec
            .resolved_subjects()
            .map_err(ReconcilerError::Controller)?;

        status.provider_type.clone_from(&secret.spec.provider);

        let change = if !status.created {
            self.provider
                .create_access(secret, access, &mut status.provider)
                .await?;
            if status.provider.is_empty() {
                return Err(ReconcilerError::Controller(format!(
                    "provider '{}' recorded no backend identifiers for the grant",
                    self.provider.kind()
                )));
            }
            status.created = true;
            info!(secret = %secret.name_any(), subjects = access.spec.subjects.len(), "Granted access");
            Change::Created
        } else if grant_is_current(secret, access, status) {
            debug!("Subjects and target secret unchanged");
            Change::Unchanged
        } else {
            self.provider
                .update_access(secret, access, &mut status.provider)
                .await?;
            info!(secret = %secret.name_any(), subjects = access.spec.subjects.len(), "Updated access grant");
            Change::Updated
        };

        status.subjects.clone_from(&access.spec.subjects);
        status.secret_name = secret.name_any();
        status.secret_handles = secret.backend_handles();
        status.service_account_annotation = status
            .provider
            .get(SERVICE_ACCOUNT_ANNOTATION_HANDLE)
            .cloned();
        Ok(change)
    }

    /// Revoke the grant from recorded handles
    ///
    /// # Errors
    ///
    /// `Provider` for backend failures other than not-found.
    pub async fn delete(&self, status: &ExternalSecretAccessStatus) -> Result<(), ReconcilerError> {
        if status.provider.is_empty() {
            debug!("No grant was recorded");
            return Ok(());
        }
        self.provider.delete_access(&status.provider).await?;
        info!("Revoked access grant");
        Ok(())
    }
}

/// The recorded grant reads the same secret object for the same subjects
///
/// A retargeted `secretName` and a secret recreated under new backend
/// handles both make the grant stale.
fn grant_is_current(
    secret: &ExternalSecret,
    access: &ExternalSecretAccess,
    status: &ExternalSecretAccessStatus,
) -> bool {
    status.subjects == access.spec.subjects
        && status.secret_name == secret.name_any()
        && status.secret_handles == secret.backend_handles()
}

fn ensure_secret_ready(secret: &ExternalSecret) -> Result<(), ReconcilerError> {
    if secret.is_created() {
        Ok(())
    } else {
        Err(ReconcilerError::Controller(format!(
            "secret '{}' is not created yet",
            secret.name_any()
        )))
    }
}

/// Controller entry point for `ExternalSecretAccess`
///
/// # Errors
///
/// Any failure; the error policy schedules the retry.
pub async fn reconcile_access(
    obj: Arc<ExternalSecretAccess>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let span = info_span!(
        "reconcile",
        resource.kind = KIND,
        resource.name = %name,
        resource.namespace = %namespace,
        secret = %obj.spec.secret_name,
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(KIND);
        let api: Api<ExternalSecretAccess> = Api::namespaced(ctx.client.clone(), &namespace);

        let result = if obj.metadata.deletion_timestamp.is_some() {
            finalize(&api, &obj, &ctx).await
        } else {
            let secrets: Api<ExternalSecret> = Api::namespaced(ctx.client.clone(), &namespace);
            apply(&api, &secrets, &obj, &ctx).await
        };

        metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.access_limiter.forget(&format!("{namespace}/{name}"));
        }
        result
    }
    .instrument(span)
    .await
}

async fn apply(
    api: &Api<ExternalSecretAccess>,
    secrets: &Api<ExternalSecret>,
    obj: &ExternalSecretAccess,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    finalizer::add(api, obj).await?;

    let mut status = obj.status.clone().unwrap_or_default();
    let first_create = !status.created;
    let deadline = ctx.config.reconcile_timeout();

    let outcome = {
        let run = async {
            let secret = secrets.get_opt(&obj.spec.secret_name).await?.ok_or_else(|| {
                ReconcilerError::Controller(format!(
                    "secret '{}' does not exist",
                    obj.spec.secret_name
                ))
            })?;
            let provider = ctx.registry.get(&secret.spec.provider).await?;
            AccessLifecycle::new(provider.as_ref())
                .apply(&secret, obj, &mut status)
                .await
        };
        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(ReconcilerError::Timeout(deadline)),
        }
    };

    match &outcome {
        Ok(change) => record_success(&mut status.conditions, *change),
        Err(e) => record_failure(&mut status.conditions, e, first_create),
    }

    if obj.status.as_ref() != Some(&status) {
        if let Err(e) = patch_status(api, &obj.name_any(), &status).await {
            error!(error = %e, "Failed to write status after reconciliation");
            outcome?;
            return Err(e.into());
        }
    }

    outcome?;
    Ok(ctx
        .config
        .success_requeue()
        .map_or_else(Action::await_change, Action::requeue))
}

async fn finalize(
    api: &Api<ExternalSecretAccess>,
    obj: &ExternalSecretAccess,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    if !finalizer::has_finalizer(obj) {
        return Ok(Action::await_change());
    }

    let mut status = obj.status.clone().unwrap_or_default();
    let deadline = ctx.config.reconcile_timeout();

    let outcome = {
        let run = async {
            if status.provider.is_empty() {
                return Ok(());
            }
            let provider = ctx.registry.get(&status.provider_type).await?;
            AccessLifecycle::new(provider.as_ref()).delete(&status).await
        };
        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(ReconcilerError::Timeout(deadline)),
        }
    };

    if let Err(e) = &outcome {
        record_failure(&mut status.conditions, e, false);
        if let Err(patch_err) = patch_status(api, &obj.name_any(), &status).await {
            warn!(error = %patch_err, "Failed to record teardown failure in status");
        }
    }
    outcome?;

    finalizer::remove(api, obj).await?;
    Ok(Action::await_change())
}
