//! # CRD Validation Tests
//!
//! Deserializes sample manifests for every resource kind to catch schema
//! drift early, and checks the generated CRDs.

use kube::core::CustomResourceExt;
use secret_access_controller::crd::{
    AwsProviderConfig, ExternalSecret, ExternalSecretAccess, ExternalSecretProvider, Subject,
    ValueSource,
};

#[test]
fn test_random_secret_manifest() {
    let yaml = r#"
apiVersion: secrets.access-controller.io/v1alpha1
kind: ExternalSecret
metadata:
  name: db-password
  namespace: payments
spec:
  provider: aws-main
  externalName: prod/payments/db
  random:
    regex: "[a-zA-Z0-9]"
    size: 32
    rotate: 30 days
  recoveryWindow: 7
  providerSpec:
    KmsKeyArn: arn:aws:kms:eu-west-1:123456789012:key/abcd
"#;

    let secret: ExternalSecret = serde_yaml::from_str(yaml).expect("manifest parses");
    assert_eq!(secret.spec.provider, "aws-main");
    assert_eq!(secret.spec.recovery_window, 7);
    assert_eq!(secret.external_name(), "prod/payments/db");
    assert!(!secret.spec.overwrite);

    match secret.spec.value_source().unwrap() {
        ValueSource::Random(random) => {
            assert_eq!(random.size, 32);
            assert_eq!(random.rotate.as_deref(), Some("30 days"));
        }
        other => panic!("expected random source, got {other:?}"),
    }
    assert_eq!(
        secret.spec.provider_spec.get("KmsKeyArn").map(String::as_str),
        Some("arn:aws:kms:eu-west-1:123456789012:key/abcd")
    );
}

#[test]
fn test_literal_secret_with_status() {
    let yaml = r#"
apiVersion: secrets.access-controller.io/v1alpha1
kind: ExternalSecret
metadata:
  name: api-key
  namespace: payments
spec:
  provider: aws-main
  secretString: s3cr3t
  overwrite: true
status:
  created: true
  version: "3"
  name: api-key
  lastUpdateDate: "2026-01-02T03:04:05Z"
  provider:
    SecretArn: arn:aws:secretsmanager:eu-west-1:123456789012:secret:api-key-Ab12Cd
  conditions:
    - type: Available
      status: "True"
      reason: Updated
"#;

    let secret: ExternalSecret = serde_yaml::from_str(yaml).expect("manifest parses");
    assert_eq!(secret.spec.value_source().unwrap(), ValueSource::Literal("s3cr3t"));
    assert!(secret.is_created());

    let status = secret.status.as_ref().unwrap();
    assert_eq!(status.version, "3");
    assert!(status.last_update_date.is_some());
    assert_eq!(status.conditions.len(), 1);
    assert!(secret.backend_handles().contains_key("SecretArn"));
}

#[test]
fn test_external_secret_manifest() {
    let yaml = r#"
apiVersion: secrets.access-controller.io/v1alpha1
kind: ExternalSecret
metadata:
  name: vendor-token
  namespace: payments
spec:
  provider: aws-main
  external: true
"#;

    let secret: ExternalSecret = serde_yaml::from_str(yaml).expect("manifest parses");
    assert_eq!(secret.spec.value_source().unwrap(), ValueSource::External);
    assert_eq!(secret.external_name(), "vendor-token");
}

#[test]
fn test_access_manifest() {
    let yaml = r#"
apiVersion: secrets.access-controller.io/v1alpha1
kind: ExternalSecretAccess
metadata:
  name: db-password-readers
  namespace: payments
spec:
  secretName: db-password
  subjects:
    - serviceAccount:
        namespace: payments
        name: api
    - provider:
        identifier: arn:aws:iam::111122223333:role/batch
"#;

    let access: ExternalSecretAccess = serde_yaml::from_str(yaml).expect("manifest parses");
    assert_eq!(access.spec.secret_name, "db-password");

    let subjects = access.spec.resolved_subjects().unwrap();
    assert!(matches!(subjects[0], Subject::ServiceAccount(sa) if sa.name == "api"));
    assert!(
        matches!(subjects[1], Subject::External(ext) if ext.identifier.ends_with("role/batch"))
    );
}

#[test]
fn test_access_subject_with_both_variants_rejected() {
    let yaml = r#"
apiVersion: secrets.access-controller.io/v1alpha1
kind: ExternalSecretAccess
metadata:
  name: confused
  namespace: payments
spec:
  secretName: db-password
  subjects:
    - serviceAccount:
        namespace: payments
        name: api
      provider:
        identifier: arn:aws:iam::111122223333:role/batch
"#;

    let access: ExternalSecretAccess = serde_yaml::from_str(yaml).expect("manifest parses");
    assert!(access.spec.resolved_subjects().is_err());
}

#[test]
fn test_provider_manifest() {
    let yaml = r#"
apiVersion: secrets.access-controller.io/v1alpha1
kind: ExternalSecretProvider
metadata:
  name: aws-main
spec:
  provider: aws
  config:
    region: eu-west-1
    oidcProviderArn: arn:aws:iam::123456789012:oidc-provider/oidc.eks.eu-west-1.amazonaws.com/id/ABCDEF
    resourcePrefix: team-a
"#;

    let provider: ExternalSecretProvider = serde_yaml::from_str(yaml).expect("manifest parses");
    let config = AwsProviderConfig::from_map(&provider.spec.config).unwrap();
    assert_eq!(config.region.as_deref(), Some("eu-west-1"));
    assert_eq!(config.resource_prefix.as_deref(), Some("team-a"));
    assert!(config.oidc_provider_arn.is_some());
}

#[test]
fn test_generated_crds() {
    let secret = ExternalSecret::crd();
    assert_eq!(secret.spec.group, "secrets.access-controller.io");
    assert_eq!(secret.spec.names.kind, "ExternalSecret");
    assert_eq!(secret.spec.scope, "Namespaced");
    assert!(secret.spec.versions[0].subresources.is_some());

    let access = ExternalSecretAccess::crd();
    assert_eq!(access.spec.names.kind, "ExternalSecretAccess");
    assert_eq!(access.spec.scope, "Namespaced");

    let provider = ExternalSecretProvider::crd();
    assert_eq!(provider.spec.names.kind, "ExternalSecretProvider");
    assert_eq!(provider.spec.scope, "Cluster");
}
