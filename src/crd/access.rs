//! # ExternalSecretAccess
//!
//! A read grant on one `ExternalSecret` for a set of identities.

use crate::crd::Condition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ExternalSecretAccess Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: secrets.access-controller.io/v1alpha1
/// kind: ExternalSecretAccess
/// metadata:
///   name: db-password-readers
///   namespace: payments
/// spec:
///   secretName: db-password
///   subjects:
///     - serviceAccount:
///         namespace: payments
///         name: api
///     - provider:
///         identifier: arn:aws:iam::111122223333:role/batch
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ExternalSecretAccess",
    group = "secrets.access-controller.io",
    version = "v1alpha1",
    namespaced,
    status = "ExternalSecretAccessStatus",
    shortname = "xsa",
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.secretName"}, {"name":"Created", "type":"boolean", "jsonPath":".status.created"}, {"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretAccessSpec {
    /// Identities granted read access, in declaration order
    #[serde(default)]
    pub subjects: Vec<AccessSubject>,
    /// Name of the `ExternalSecret` in the same namespace
    pub secret_name: String,
}

/// One grantee. Exactly one of the fields must be set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessSubject {
    /// In-cluster workload identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountRef>,
    /// Identity from a foreign backend account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ExternalIdentityRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ExternalIdentityRef {
    /// Backend identity string, e.g. an IAM principal ARN
    pub identifier: String,
}

/// Status of the ExternalSecretAccess resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretAccessStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub created: bool,
    /// Subjects as of the last successful apply
    #[serde(default)]
    pub subjects: Vec<AccessSubject>,
    /// Secret the grant currently reads
    #[serde(default)]
    pub secret_name: String,
    /// Backend handles of that secret when the grant was written
    #[serde(default)]
    pub secret_handles: BTreeMap<String, String>,
    /// Provider name the grant was created with
    #[serde(default)]
    pub provider_type: String,
    /// Annotation to put on granted service accounts, when the backend needs one
    #[serde(default)]
    pub service_account_annotation: Option<String>,
    /// Opaque backend handles, sufficient to revoke the grant
    #[serde(default)]
    pub provider: BTreeMap<String, String>,
}

/// Borrowed view of a validated subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    ServiceAccount(&'a ServiceAccountRef),
    External(&'a ExternalIdentityRef),
}

impl AccessSubject {
    #[must_use]
    pub fn service_account(namespace: &str, name: &str) -> Self {
        Self {
            service_account: Some(ServiceAccountRef {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            provider: None,
        }
    }

    #[must_use]
    pub fn external(identifier: &str) -> Self {
        Self {
            service_account: None,
            provider: Some(ExternalIdentityRef {
                identifier: identifier.to_string(),
            }),
        }
    }

    /// # Errors
    ///
    /// Returns a description when neither or both variants are set.
    pub fn resolve(&self) -> Result<Subject<'_>, String> {
        match (&self.service_account, &self.provider) {
            (Some(sa), None) => Ok(Subject::ServiceAccount(sa)),
            (None, Some(ext)) => Ok(Subject::External(ext)),
            (None, None) => Err("subject must set serviceAccount or provider".to_string()),
            (Some(_), Some(_)) => {
                Err("subject must set only one of serviceAccount or provider".to_string())
            }
        }
    }
}

impl ExternalSecretAccessSpec {
    /// Resolve every subject, rejecting an empty list.
    ///
    /// # Errors
    ///
    /// Returns the first invalid subject, or a message when there are none.
    pub fn resolved_subjects(&self) -> Result<Vec<Subject<'_>>, String> {
        if self.subjects.is_empty() {
            return Err("at least one subject is required".to_string());
        }
        self.subjects
            .iter()
            .enumerate()
            .map(|(i, s)| s.resolve().map_err(|e| format!("subjects[{i}]: {e}")))
            .collect()
    }
}

impl ExternalSecretAccess {
    #[must_use]
    pub fn backend_handles(&self) -> BTreeMap<String, String> {
        self.status
            .as_ref()
            .map(|s| s.provider.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_subjects_rejected() {
        let spec = ExternalSecretAccessSpec {
            subjects: vec![],
            secret_name: "db".to_string(),
        };
        assert!(spec.resolved_subjects().is_err());
    }

    #[test]
    fn test_subject_with_both_variants_rejected() {
        let spec = ExternalSecretAccessSpec {
            subjects: vec![
                AccessSubject::service_account("ns", "sa"),
                AccessSubject {
                    service_account: Some(ServiceAccountRef {
                        namespace: "ns".to_string(),
                        name: "sa".to_string(),
                    }),
                    provider: Some(ExternalIdentityRef {
                        identifier: "arn:aws:iam::111122223333:root".to_string(),
                    }),
                },
            ],
            secret_name: "db".to_string(),
        };
        let err = spec.resolved_subjects().unwrap_err();
        assert!(err.starts_with("subjects[1]"), "{err}");
    }

    #[test]
    fn test_subjects_keep_declaration_order() {
        let spec = ExternalSecretAccessSpec {
            subjects: vec![
                AccessSubject::external("arn:aws:iam::111122223333:user/x"),
                AccessSubject::service_account("ns", "sa"),
            ],
            secret_name: "db".to_string(),
        };
        let subjects = spec.resolved_subjects().unwrap();
        assert!(matches!(subjects[0], Subject::External(_)));
        assert!(matches!(subjects[1], Subject::ServiceAccount(sa) if sa.name == "sa"));
    }
}
