//! # Secret Reconciler
//!
//! Drives an `ExternalSecret` through create, update and delete against its
//! provider.
//!
//! [`SecretLifecycle`] holds the state machine and only touches the provider
//! and the status it is given, which keeps it testable without a cluster.
//! [`reconcile_secret`] wraps it with finalizer handling, the reconciliation
//! deadline and status writes.

use super::finalizer;
use super::status::{patch_status, record_failure, record_success, Change};
use super::types::{Reconciler, ReconcilerError};
use crate::constants::EXTERNAL_SECRET_PLACEHOLDER;
use crate::controller::rotation::{generate, next_rotation, TimeExpressionParser};
use crate::crd::{ExternalSecret, ExternalSecretStatus, ValueSource};
use crate::observability::metrics;
use crate::provider::{BackendHandles, Provider};
use chrono::{DateTime, Utc};
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use zeroize::Zeroizing;

pub const KIND: &str = "ExternalSecret";

/// State machine for one secret against one provider
#[derive(Debug)]
pub struct SecretLifecycle<'a> {
    provider: &'a dyn Provider,
    parser: &'a dyn TimeExpressionParser,
}

impl<'a> SecretLifecycle<'a> {
    #[must_use]
    pub fn new(provider: &'a dyn Provider, parser: &'a dyn TimeExpressionParser) -> Self {
        Self { provider, parser }
    }

    /// Create the backend secret, or bring an existing one up to date
    ///
    /// Backend handles are written into `status` as the provider records
    /// them, so they survive an error or a cancelled future.
    ///
    /// # Errors
    ///
    /// `Controller` for an invalid spec, `Provider` for backend failures.
    pub async fn apply(
        &self,
        secret: &ExternalSecret,
        status: &mut ExternalSecretStatus,
        now: DateTime<Utc>,
    ) -> Result<Change, ReconcilerError> {
        let change = if status.created {
            self.update(secret, status, now).await?
        } else {
            self.create(secret, status, now).await?;
            Change::Created
        };
        status.observed_generation = secret.metadata.generation;
        Ok(change)
    }

    async fn create(
        &self,
        secret: &ExternalSecret,
        status: &mut ExternalSecretStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcilerError> {
        let source = secret
            .spec
            .value_source()
            .map_err(ReconcilerError::Controller)?;

        let value = match source {
            ValueSource::External => {
                status.is_external = true;
                clear_random(status);
                Zeroizing::new(EXTERNAL_SECRET_PLACEHOLDER.to_string())
            }
            ValueSource::Random(random) => {
                let next = self.schedule(random.rotate.as_deref(), now)?;
                let value = generate(&random.regex, random.size)?;

                status.is_external = false;
                status.is_random = true;
                status.random_re = Some(random.regex.clone());
                status.rotate_expression.clone_from(&random.rotate);
                status.next_rotate_date = next;
                value
            }
            ValueSource::Literal(literal) => {
                status.is_external = false;
                clear_random(status);
                Zeroizing::new(literal.to_string())
            }
        };

        self.provider
            .create_secret(secret, &value, &mut status.provider)
            .await?;

        if status.provider.is_empty() {
            return Err(ReconcilerError::Controller(format!(
                "provider '{}' recorded no backend identifiers for {}",
                self.provider.kind(),
                secret.external_name()
            )));
        }

        let written_at = self.written_at(secret, &status.provider, now).await;
        status.created = true;
        status.name = secret.external_name();
        status.version = "1".to_string();
        status.deletion_date = None;
        status.last_update_date = Some(written_at);
        info!(secret = %status.name, "Created backend secret");
        Ok(())
    }

    async fn update(
        &self,
        secret: &ExternalSecret,
        status: &mut ExternalSecretStatus,
        now: DateTime<Utc>,
    ) -> Result<Change, ReconcilerError> {
        let source = secret
            .spec
            .value_source()
            .map_err(ReconcilerError::Controller)?;
        status.name = secret.external_name();

        let value = match source {
            ValueSource::External => {
                status.is_external = true;
                clear_random(status);
                return Ok(Change::Unchanged);
            }
            ValueSource::Random(random) => {
                let pattern_changed = status.random_re.as_deref() != Some(random.regex.as_str());
                status.is_external = false;
                status.is_random = true;

                let due = match random.rotate.as_deref() {
                    None => {
                        status.rotate_expression = None;
                        status.next_rotate_date = None;
                        false
                    }
                    Some(expr) if status.rotate_expression.as_deref() != Some(expr) => {
                        // Added or edited: the schedule restarts from now
                        status.next_rotate_date = self.schedule(Some(expr), now)?;
                        status.rotate_expression = Some(expr.to_string());
                        // An absolute date that already passed is due at once
                        status.next_rotate_date.is_none()
                    }
                    Some(_) => status.next_rotate_date.is_some_and(|at| at <= now),
                };

                if !due && !pattern_changed {
                    debug!(next_rotation = ?status.next_rotate_date, "Rotation not due");
                    return Ok(Change::Unchanged);
                }

                let next = self.schedule(random.rotate.as_deref(), now)?;
                let value = generate(&random.regex, random.size)?;

                self.provider
                    .update_secret(secret, &value, &mut status.provider)
                    .await?;

                status.random_re = Some(random.regex.clone());
                status.next_rotate_date = next;
                if due {
                    metrics::increment_secret_rotations();
                    info!(secret = %status.name, next_rotation = ?next, "Rotated secret");
                }
                return Ok(self.bump_version(secret, status, now).await);
            }
            ValueSource::Literal(literal) => literal,
        };

        let switched_source = status.is_external || status.is_random;
        status.is_external = false;
        clear_random(status);

        let spec_changed = secret.metadata.generation != status.observed_generation;
        if !spec_changed && !switched_source {
            let backend_changed = self
                .provider
                .last_changed(secret, &status.provider)
                .await?;
            if !drifted(backend_changed, status.last_update_date) {
                return Ok(Change::Unchanged);
            }
            info!(
                secret = %status.name,
                backend_changed = ?backend_changed,
                last_update = ?status.last_update_date,
                "Backend changed out of band, restoring declared value"
            );
        }

        let value = Zeroizing::new(value.to_string());
        self.provider
            .update_secret(secret, &value, &mut status.provider)
            .await?;
        Ok(self.bump_version(secret, status, now).await)
    }

    /// Delete the backend secret using recorded handles
    ///
    /// # Errors
    ///
    /// `Provider` when the backend refuses the deletion.
    pub async fn delete(
        &self,
        secret: &ExternalSecret,
        status: &mut ExternalSecretStatus,
    ) -> Result<(), ReconcilerError> {
        if !status.created && status.provider.is_empty() {
            debug!("Nothing was created in the backend");
            return Ok(());
        }

        let purge_at = self
            .provider
            .delete_secret(secret, &status.provider)
            .await?;
        status.deletion_date = purge_at;
        info!(secret = %secret.external_name(), purge_at = ?purge_at, "Deleted backend secret");
        Ok(())
    }

    /// Deadline for an optional rotation expression; `None` once a one-shot
    /// date has passed
    fn schedule(
        &self,
        expression: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ReconcilerError> {
        match expression {
            Some(expr) => Ok(next_rotation(self.parser, expr, now)?),
            None => Ok(None),
        }
    }

    async fn bump_version(
        &self,
        secret: &ExternalSecret,
        status: &mut ExternalSecretStatus,
        now: DateTime<Utc>,
    ) -> Change {
        status.version = next_version(&status.version);
        status.last_update_date = Some(self.written_at(secret, &status.provider, now).await);
        Change::Updated
    }

    /// Timestamp to record for a write, never earlier than the backend's own
    async fn written_at(
        &self,
        secret: &ExternalSecret,
        handles: &BackendHandles,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match self.provider.last_changed(secret, handles).await {
            Ok(Some(backend)) => backend.max(now),
            Ok(None) => now,
            Err(e) => {
                warn!(error = %e, "Could not read back last-changed date");
                now
            }
        }
    }
}

fn clear_random(status: &mut ExternalSecretStatus) {
    status.is_random = false;
    status.random_re = None;
    status.rotate_expression = None;
    status.next_rotate_date = None;
}

/// The backend reports a change newer than our last write
fn drifted(backend_changed: Option<DateTime<Utc>>, last_update: Option<DateTime<Utc>>) -> bool {
    match (backend_changed, last_update) {
        (Some(backend), Some(ours)) => backend > ours,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn next_version(current: &str) -> String {
    current
        .parse::<u64>()
        .map_or(1, |v| v.saturating_add(1))
        .to_string()
}

/// Controller entry point for `ExternalSecret`
///
/// # Errors
///
/// Any failure; the error policy schedules the retry.
pub async fn reconcile_secret(
    obj: Arc<ExternalSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let span = info_span!(
        "reconcile",
        resource.kind = KIND,
        resource.name = %name,
        resource.namespace = %namespace,
        provider = %obj.spec.provider,
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(KIND);
        let api: Api<ExternalSecret> = Api::namespaced(ctx.client.clone(), &namespace);

        let result = if obj.metadata.deletion_timestamp.is_some() {
            finalize(&api, &obj, &ctx).await
        } else {
            apply(&api, &obj, &ctx).await
        };

        metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.secret_limiter.forget(&format!("{namespace}/{name}"));
        }
        result
    }
    .instrument(span)
    .await
}

async fn apply(
    api: &Api<ExternalSecret>,
    obj: &ExternalSecret,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    finalizer::add(api, obj).await?;

    let mut status = obj.status.clone().unwrap_or_default();
    let first_create = !status.created;
    let deadline = ctx.config.reconcile_timeout();
    let now = Utc::now();

    let outcome = {
        let run = async {
            let provider = ctx.registry.get(&obj.spec.provider).await?;
            SecretLifecycle::new(provider.as_ref(), ctx.parser.as_ref())
                .apply(obj, &mut status, now)
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
    Ok(requeue_after(&status, ctx.config.success_requeue(), now))
}

async fn finalize(
    api: &Api<ExternalSecret>,
    obj: &ExternalSecret,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    if !finalizer::has_finalizer(obj) {
        return Ok(Action::await_change());
    }

    let mut status = obj.status.clone().unwrap_or_default();
    let deadline = ctx.config.reconcile_timeout();

    let outcome = {
        let run = async {
            if !status.created && status.provider.is_empty() {
                return Ok(());
            }
            let provider = ctx.registry.get(&obj.spec.provider).await?;
            SecretLifecycle::new(provider.as_ref(), ctx.parser.as_ref())
                .delete(obj, &mut status)
                .await
        };
        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(ReconcilerError::Timeout(deadline)),
        }
    };

    if let Err(e) = &outcome {
        record_failure(&mut status.conditions, e, false);
    }
    if obj.status.as_ref() != Some(&status) {
        if let Err(e) = patch_status(api, &obj.name_any(), &status).await {
            warn!(error = %e, "Failed to record deletion in status");
        }
    }
    outcome?;

    finalizer::remove(api, obj).await?;
    Ok(Action::await_change())
}

/// Requeue for the next rotation, or the configured interval, whichever is sooner
fn requeue_after(
    status: &ExternalSecretStatus,
    default: Option<Duration>,
    now: DateTime<Utc>,
) -> Action {
    let rotation = status
        .next_rotate_date
        .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));

    match (rotation, default) {
        (Some(r), Some(d)) => Action::requeue(r.min(d)),
        (Some(r), None) => Action::requeue(r),
        (None, Some(d)) => Action::requeue(d),
        (None, None) => Action::await_change(),
    }
}
