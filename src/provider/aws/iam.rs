//! # IAM Access Grants
//!
//! A grant is a role whose trust document admits the declared subjects, with
//! one customer managed policy attached that allows reading the target
//! secret.
//!
//! ## Version pressure
//!
//! IAM keeps at most [`MAX_POLICY_VERSIONS`] versions per managed policy,
//! including the default one. Publishing a new version therefore prunes
//! first (to leave room), publishes, then re-lists and prunes again so at
//! most one previous version survives. The backend is re-listed each time
//! because other actors may have added or removed versions. The default
//! version is never deleted.

use super::client::{IamApi, PolicyVersion};
use super::policy::{grant_name, policy_arn_for, read_document, trust_document, OidcProvider};
use super::{POLICY_ARN, ROLE_ARN, ROLE_NAME};
use crate::crd::{ExternalSecret, ExternalSecretAccess};
use crate::observability::metrics;
use crate::provider::{BackendHandles, ProviderError, SERVICE_ACCOUNT_ANNOTATION_HANDLE};
use kube::ResourceExt;
use std::cmp::Reverse;
use tracing::{debug, info};

/// Versions IAM retains per managed policy
pub const MAX_POLICY_VERSIONS: usize = 5;

/// Non-default versions kept after a routine update
pub const RETAINED_AFTER_UPDATE: usize = 1;

/// Annotation IRSA reads from a service account
pub const IRSA_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Settings shared by every access operation of one provider
#[derive(Debug, Clone)]
pub struct AccessSettings {
    pub resource_prefix: String,
    pub oidc: Option<OidcProvider>,
}

/// Rendered documents for one access resource
struct Documents {
    name: String,
    trust: String,
    read: String,
}

fn render(
    settings: &AccessSettings,
    secret_arn: &str,
    access: &ExternalSecretAccess,
) -> Result<Documents, ProviderError> {
    let subjects = access
        .spec
        .resolved_subjects()
        .map_err(ProviderError::InvalidRequest)?;
    let namespace = access.namespace().unwrap_or_default();

    Ok(Documents {
        name: grant_name(&settings.resource_prefix, &namespace, &access.name_any()),
        trust: trust_document(&subjects, settings.oidc.as_ref())?.to_json()?,
        read: read_document(secret_arn).to_json()?,
    })
}

fn target_secret_arn(secret: &ExternalSecret) -> Result<String, ProviderError> {
    secret
        .status
        .as_ref()
        .and_then(|s| s.provider.get(super::SECRET_ARN))
        .cloned()
        .ok_or_else(|| {
            ProviderError::InvalidRequest(format!(
                "secret '{}' has no recorded ARN",
                secret.name_any()
            ))
        })
}

/// Ignore a not-found outcome
fn tolerate_missing(result: Result<(), ProviderError>) -> Result<(), ProviderError> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "Already absent");
            Ok(())
        }
        other => other,
    }
}

/// Delete the oldest non-default versions until at most `keep` remain
///
/// Returns the number of versions deleted.
pub async fn prune_policy_versions(
    iam: &dyn IamApi,
    policy_arn: &str,
    keep: usize,
) -> Result<usize, ProviderError> {
    let mut candidates: Vec<PolicyVersion> = iam
        .list_policy_versions(policy_arn)
        .await?
        .into_iter()
        .filter(|v| !v.is_default)
        .collect();

    if candidates.len() <= keep {
        return Ok(0);
    }

    // Newest first; version ids ("v7") break ties on equal timestamps
    candidates.sort_by_key(|v| Reverse((v.create_date, version_number(&v.version_id))));

    let mut deleted = 0;
    for version in candidates.iter().skip(keep) {
        tolerate_missing(
            iam.delete_policy_version(policy_arn, &version.version_id)
                .await,
        )?;
        deleted += 1;
    }

    debug!(policy.arn = %policy_arn, deleted, keep, "Pruned policy versions");
    metrics::increment_policy_versions_pruned(deleted);
    Ok(deleted)
}

fn version_number(version_id: &str) -> u64 {
    version_id
        .trim_start_matches(['v', 'V'])
        .parse()
        .unwrap_or(0)
}

/// Make `document` the default version of the policy
async fn publish_policy_version(
    iam: &dyn IamApi,
    policy_arn: &str,
    document: &str,
) -> Result<(), ProviderError> {
    prune_policy_versions(iam, policy_arn, MAX_POLICY_VERSIONS - 2).await?;
    let version = iam
        .create_policy_version(policy_arn, document, true)
        .await?;
    prune_policy_versions(iam, policy_arn, RETAINED_AFTER_UPDATE).await?;
    info!(policy.arn = %policy_arn, version = %version, "Published policy version");
    Ok(())
}

fn record_role(handles: &mut BackendHandles, role_name: &str, role_arn: &str) {
    handles.insert(ROLE_NAME.to_string(), role_name.to_string());
    handles.insert(ROLE_ARN.to_string(), role_arn.to_string());
    handles.insert(
        SERVICE_ACCOUNT_ANNOTATION_HANDLE.to_string(),
        format!("{IRSA_ANNOTATION}={role_arn}"),
    );
}

/// Provision the grant, reusing any objects already recorded in `handles`
pub async fn create_access(
    iam: &dyn IamApi,
    settings: &AccessSettings,
    secret: &ExternalSecret,
    access: &ExternalSecretAccess,
    handles: &mut BackendHandles,
) -> Result<(), ProviderError> {
    let secret_arn = target_secret_arn(secret)?;
    let docs = render(settings, &secret_arn, access)?;

    let policy_arn = match handles.get(POLICY_ARN).cloned() {
        Some(arn) => {
            debug!(policy.arn = %arn, "Reusing recorded policy");
            arn
        }
        None => {
            let arn = match iam.create_policy(&docs.name, &docs.read).await {
                Ok(arn) => arn,
                Err(ProviderError::AlreadyExists(_)) => {
                    // Created by an attempt whose handles were lost; take it over
                    let arn = policy_arn_for(&secret_arn, &docs.name)?;
                    publish_policy_version(iam, &arn, &docs.read).await?;
                    arn
                }
                Err(e) => return Err(e),
            };
            info!(policy.arn = %arn, "Created read policy");
            handles.insert(POLICY_ARN.to_string(), arn.clone());
            arn
        }
    };

    let role_name = match handles.get(ROLE_NAME).cloned() {
        Some(role_name) => {
            iam.update_assume_role_policy(&role_name, &docs.trust)
                .await?;
            if !handles.contains_key(ROLE_ARN) {
                let role_arn = iam.get_role_arn(&role_name).await?;
                record_role(handles, &role_name, &role_arn);
            }
            role_name
        }
        None => {
            let role_arn = match iam.create_role(&docs.name, &docs.trust).await {
                Ok(arn) => arn,
                Err(ProviderError::AlreadyExists(_)) => {
                    iam.update_assume_role_policy(&docs.name, &docs.trust)
                        .await?;
                    iam.get_role_arn(&docs.name).await?
                }
                Err(e) => return Err(e),
            };
            info!(role.name = %docs.name, role.arn = %role_arn, "Created grantee role");
            record_role(handles, &docs.name, &role_arn);
            docs.name.clone()
        }
    };

    iam.attach_role_policy(&role_name, &policy_arn).await?;
    Ok(())
}

/// Replace both documents with the current subjects
///
/// Objects that disappeared out of band are recreated.
pub async fn update_access(
    iam: &dyn IamApi,
    settings: &AccessSettings,
    secret: &ExternalSecret,
    access: &ExternalSecretAccess,
    handles: &mut BackendHandles,
) -> Result<(), ProviderError> {
    let (Some(policy_arn), Some(role_name)) =
        (handles.get(POLICY_ARN).cloned(), handles.get(ROLE_NAME).cloned())
    else {
        return create_access(iam, settings, secret, access, handles).await;
    };

    let secret_arn = target_secret_arn(secret)?;
    let docs = render(settings, &secret_arn, access)?;

    match publish_policy_version(iam, &policy_arn, &docs.read).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            handles.remove(POLICY_ARN);
            return create_access(iam, settings, secret, access, handles).await;
        }
        Err(e) => return Err(e),
    }

    match iam.update_assume_role_policy(&role_name, &docs.trust).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            handles.remove(ROLE_NAME);
            handles.remove(ROLE_ARN);
            create_access(iam, settings, secret, access, handles).await
        }
        Err(e) => Err(e),
    }
}

/// Revoke the grant from recorded handles alone
pub async fn delete_access(iam: &dyn IamApi, handles: &BackendHandles) -> Result<(), ProviderError> {
    let policy_arn = handles.get(POLICY_ARN);
    let role_name = handles.get(ROLE_NAME);

    if let (Some(role_name), Some(policy_arn)) = (role_name, policy_arn) {
        tolerate_missing(iam.detach_role_policy(role_name, policy_arn).await)?;
    }

    if let Some(policy_arn) = policy_arn {
        match prune_policy_versions(iam, policy_arn, 0).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        tolerate_missing(iam.delete_policy(policy_arn).await)?;
        info!(policy.arn = %policy_arn, "Deleted read policy");
    }

    if let Some(role_name) = role_name {
        tolerate_missing(iam.delete_role(role_name).await)?;
        info!(role.name = %role_name, "Deleted grantee role");
    }

    Ok(())
}
