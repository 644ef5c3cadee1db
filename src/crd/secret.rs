//! # ExternalSecret
//!
//! A secret value stored in an external backend whose lifecycle is owned by
//! this controller.

use crate::crd::Condition;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ExternalSecret Custom Resource Definition
///
/// Exactly one value source is active: a literal `secretString`, an
/// externally managed placeholder (`external: true`) or a generated
/// `random` value with optional rotation.
///
/// # Example
///
/// ```yaml
/// apiVersion: secrets.access-controller.io/v1alpha1
/// kind: ExternalSecret
/// metadata:
///   name: db-password
///   namespace: payments
/// spec:
///   provider: aws-main
///   random:
///     regex: "[a-zA-Z0-9]"
///     size: 32
///     rotate: "30 days"
///   recoveryWindow: 7
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ExternalSecret",
    group = "secrets.access-controller.io",
    version = "v1alpha1",
    namespaced,
    status = "ExternalSecretStatus",
    shortname = "xsec",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider"}, {"name":"Version", "type":"string", "jsonPath":".status.version"}, {"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    /// Literal secret value
    #[serde(default)]
    pub secret_string: Option<String>,
    /// Name of the secret in the backend; defaults to `metadata.name`
    #[serde(default)]
    pub external_name: Option<String>,
    /// Adopt a backend secret that already exists under the same name
    #[serde(default)]
    pub overwrite: bool,
    /// Generate the value from a pattern
    #[serde(default)]
    pub random: Option<RandomSpec>,
    /// The value is managed outside this controller; only a placeholder is written
    #[serde(default)]
    pub external: bool,
    /// Days the backend keeps a deleted secret recoverable; 0 deletes immediately
    #[serde(default)]
    pub recovery_window: i64,
    /// Name of the `ExternalSecretProvider` that owns the backend
    pub provider: String,
    /// Backend-specific options (e.g. `KmsKeyArn`)
    #[serde(default)]
    pub provider_spec: BTreeMap<String, String>,
}

/// Generated value settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RandomSpec {
    /// Number of times `regex` is repeated
    pub size: u32,
    /// Pattern a single generated unit must match, e.g. `[a-z0-9]`
    pub regex: String,
    /// Human-readable rotation interval, e.g. `30 days` or `in 2 weeks`
    #[serde(default)]
    pub rotate: Option<String>,
}

/// Status of the ExternalSecret resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Backend secret name last written
    #[serde(default)]
    pub name: String,
    /// Decimal counter; "1" after creation, incremented on every backend write
    #[serde(default)]
    pub version: String,
    /// Purge time scheduled by the backend on soft deletion
    #[serde(default)]
    pub deletion_date: Option<DateTime<Utc>>,
    /// Time of the last successful backend write
    #[serde(default)]
    pub last_update_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_random: bool,
    /// Set only for random secrets with a rotation expression
    #[serde(default)]
    pub next_rotate_date: Option<DateTime<Utc>>,
    /// Rotation expression `nextRotateDate` was computed from
    #[serde(default)]
    pub rotate_expression: Option<String>,
    /// Pattern the current random value was generated from
    #[serde(default)]
    pub random_re: Option<String>,
    /// Generation of the spec last pushed to the backend
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Opaque backend handles (e.g. `SecretArn`)
    #[serde(default)]
    pub provider: BTreeMap<String, String>,
}

/// The active value source of an `ExternalSecretSpec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource<'a> {
    External,
    Random(&'a RandomSpec),
    Literal(&'a str),
}

impl ExternalSecretSpec {
    /// Resolve the single active value source.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when zero or several sources are set.
    pub fn value_source(&self) -> Result<ValueSource<'_>, String> {
        let mut sources = Vec::with_capacity(1);
        if self.external {
            sources.push(ValueSource::External);
        }
        if let Some(random) = &self.random {
            sources.push(ValueSource::Random(random));
        }
        if let Some(literal) = &self.secret_string {
            sources.push(ValueSource::Literal(literal));
        }

        match sources.as_slice() {
            [source] => Ok(*source),
            [] => Err(
                "exactly one of secretString, random or external must be set, found none"
                    .to_string(),
            ),
            _ => Err(format!(
                "exactly one of secretString, random or external must be set, found {}",
                sources.len()
            )),
        }
    }
}

impl ExternalSecret {
    /// Name of the secret in the backend
    #[must_use]
    pub fn external_name(&self) -> String {
        self.spec
            .external_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Backend handles recorded on the status, empty when never created
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

    fn spec() -> ExternalSecretSpec {
        ExternalSecretSpec {
            secret_string: None,
            external_name: None,
            overwrite: false,
            random: None,
            external: false,
            recovery_window: 0,
            provider: "aws".to_string(),
            provider_spec: BTreeMap::new(),
        }
    }

    #[test]
    fn test_literal_source() {
        let s = ExternalSecretSpec {
            secret_string: Some("hunter2".to_string()),
            ..spec()
        };
        assert_eq!(s.value_source(), Ok(ValueSource::Literal("hunter2")));
    }

    #[test]
    fn test_no_source_is_rejected() {
        assert!(spec().value_source().is_err());
    }

    #[test]
    fn test_multiple_sources_are_rejected() {
        let s = ExternalSecretSpec {
            secret_string: Some("x".to_string()),
            external: true,
            ..spec()
        };
        let err = s.value_source().unwrap_err();
        assert!(err.contains("found 2"), "{err}");
    }

    #[test]
    fn test_external_name_defaults_to_metadata_name() {
        let mut secret = ExternalSecret::new("db-password", spec());
        assert_eq!(secret.external_name(), "db-password");

        secret.spec.external_name = Some("prod/db".to_string());
        assert_eq!(secret.external_name(), "prod/db");
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let s: ExternalSecretSpec = serde_json::from_value(serde_json::json!({
            "provider": "aws-main",
            "random": {"size": 16, "regex": "[a-z]", "rotate": "24 hours"},
            "recoveryWindow": 7,
            "providerSpec": {"KmsKeyArn": "arn:aws:kms:eu-west-1:123456789012:key/abc"}
        }))
        .unwrap();

        assert_eq!(s.recovery_window, 7);
        assert!(matches!(s.value_source(), Ok(ValueSource::Random(r)) if r.size == 16));
        assert!(s.provider_spec.contains_key("KmsKeyArn"));
    }
}
