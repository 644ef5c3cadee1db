//! # ExternalSecretProvider
//!
//! Declares one backend instance by name. The `provider` tag selects the
//! backend kind and `config` is decoded into that kind's typed settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// ExternalSecretProvider Custom Resource Definition
///
/// Cluster-scoped. The resource name is the key referenced by
/// `ExternalSecret.spec.provider`.
///
/// # Example
///
/// ```yaml
/// apiVersion: secrets.access-controller.io/v1alpha1
/// kind: ExternalSecretProvider
/// metadata:
///   name: aws-main
/// spec:
///   provider: aws
///   config:
///     region: eu-west-1
///     oidcProviderArn: arn:aws:iam::123456789012:oidc-provider/oidc.eks.eu-west-1.amazonaws.com/id/ABCDEF
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ExternalSecretProvider",
    group = "secrets.access-controller.io",
    version = "v1alpha1",
    shortname = "xsp",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretProviderSpec {
    /// Backend kind (`aws`)
    pub provider: String,
    /// Backend-specific settings
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Backend kinds this controller can instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Aws,
}

impl ProviderKind {
    /// Parse the variant tag of a provider resource
    ///
    /// # Errors
    ///
    /// Returns the unknown tag
    pub fn parse(tag: &str) -> Result<Self, String> {
        match tag.trim().to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            other => Err(format!("unsupported provider type '{other}'")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => f.write_str("aws"),
        }
    }
}

/// Settings for the AWS backend (Secrets Manager + IAM)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AwsProviderConfig {
    /// AWS region; the default chain is used when unset
    #[serde(default)]
    pub region: Option<String>,
    /// ARN of the cluster's IAM OIDC provider
    #[serde(default)]
    pub oidc_provider_arn: Option<String>,
    /// OIDC issuer host/path, used to derive the provider ARN when it is not given
    #[serde(default)]
    pub oidc_issuer: Option<String>,
    /// Account that owns the OIDC provider
    #[serde(default)]
    pub account_id: Option<String>,
    /// Role to assume before calling AWS
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Prefix for IAM role and policy names
    #[serde(default)]
    pub resource_prefix: Option<String>,
}

impl AwsProviderConfig {
    /// Decode from the string map of a provider resource
    ///
    /// # Errors
    ///
    /// Unknown keys are rejected so typos surface at registration time.
    pub fn from_map(config: &BTreeMap<String, String>) -> Result<Self, String> {
        let value = serde_json::to_value(config).map_err(|e| e.to_string())?;
        serde_json::from_value(value).map_err(|e| format!("invalid aws provider config: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("AWS"), Ok(ProviderKind::Aws));
        assert!(ProviderKind::parse("gcp").is_err());
    }

    #[test]
    fn test_aws_config_from_map() {
        let map = BTreeMap::from([
            ("region".to_string(), "eu-west-1".to_string()),
            ("resourcePrefix".to_string(), "team".to_string()),
        ]);
        let config = AwsProviderConfig::from_map(&map).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.resource_prefix.as_deref(), Some("team"));
        assert_eq!(config.oidc_provider_arn, None);
    }

    #[test]
    fn test_aws_config_rejects_unknown_keys() {
        let map = BTreeMap::from([("regoin".to_string(), "eu-west-1".to_string())]);
        assert!(AwsProviderConfig::from_map(&map).is_err());
    }
}
