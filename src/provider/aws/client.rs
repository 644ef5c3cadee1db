//! # AWS API Clients
//!
//! Narrow async interfaces over the IAM and Secrets Manager calls the
//! provider makes, plus their SDK-backed implementations. Service errors are
//! classified into [`ProviderError`] here so the provider logic never sees
//! SDK types.

use crate::provider::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One stored version of a managed IAM policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersion {
    pub version_id: String,
    pub is_default: bool,
    pub create_date: Option<DateTime<Utc>>,
}

/// Subset of a Secrets Manager `DescribeSecret` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretDescription {
    pub arn: String,
    pub last_changed: Option<DateTime<Utc>>,
}

/// IAM operations used for access grants
///
/// Implementations return `ProviderError::NotFound` for a missing entity and
/// `ProviderError::AlreadyExists` when a create collides with an existing name.
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Returns the policy ARN
    async fn create_policy(&self, name: &str, document: &str) -> Result<String, ProviderError>;

    /// Returns the new version id
    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<String, ProviderError>;

    async fn list_policy_versions(
        &self,
        policy_arn: &str,
    ) -> Result<Vec<PolicyVersion>, ProviderError>;

    async fn delete_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<(), ProviderError>;

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), ProviderError>;

    /// Returns the role ARN
    async fn create_role(&self, name: &str, trust_document: &str)
        -> Result<String, ProviderError>;

    /// Returns the role ARN
    async fn get_role_arn(&self, name: &str) -> Result<String, ProviderError>;

    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        trust_document: &str,
    ) -> Result<(), ProviderError>;

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str)
        -> Result<(), ProviderError>;

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str)
        -> Result<(), ProviderError>;

    async fn delete_role(&self, role_name: &str) -> Result<(), ProviderError>;
}

/// Secrets Manager operations used for secret lifecycle
#[async_trait]
pub trait SecretsApi: Send + Sync {
    /// Returns the secret ARN
    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        kms_key_id: Option<&str>,
    ) -> Result<String, ProviderError>;

    /// Returns the secret ARN
    async fn put_secret_value(&self, secret_id: &str, value: &str)
        -> Result<String, ProviderError>;

    async fn describe_secret(&self, secret_id: &str) -> Result<SecretDescription, ProviderError>;

    /// `None` deletes immediately, `Some(days)` schedules deletion.
    /// Returns the scheduled deletion date reported by the backend.
    async fn delete_secret(
        &self,
        secret_id: &str,
        recovery_window_days: Option<i64>,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;
}

fn to_chrono(dt: &aws_sdk_iam::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// IAM client backed by the AWS SDK
#[derive(Debug, Clone)]
pub struct SdkIam {
    client: aws_sdk_iam::Client,
}

impl SdkIam {
    #[must_use]
    pub fn new(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }
}

fn iam_error<E, R>(
    operation: &str,
    subject: &str,
    err: &aws_sdk_iam::error::SdkError<E, R>,
    missing: impl Fn(&E) -> bool,
    exists: impl Fn(&E) -> bool,
) -> ProviderError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service) if missing(service) => ProviderError::NotFound(subject.to_string()),
        Some(service) if exists(service) => ProviderError::AlreadyExists(subject.to_string()),
        _ => ProviderError::backend(
            operation,
            aws_sdk_iam::error::DisplayErrorContext(err).to_string(),
        ),
    }
}

#[async_trait]
impl IamApi for SdkIam {
    async fn create_policy(&self, name: &str, document: &str) -> Result<String, ProviderError> {
        let output = self
            .client
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .description("Read access to one secret, managed by secret-access-controller")
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "CreatePolicy",
                    name,
                    &e,
                    |_| false,
                    aws_sdk_iam::operation::create_policy::CreatePolicyError::is_entity_already_exists_exception,
                )
            })?;

        output
            .policy()
            .and_then(|p| p.arn())
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::backend("CreatePolicy", "response carried no policy ARN"))
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<String, ProviderError> {
        let output = self
            .client
            .create_policy_version()
            .policy_arn(policy_arn)
            .policy_document(document)
            .set_as_default(set_as_default)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "CreatePolicyVersion",
                    policy_arn,
                    &e,
                    aws_sdk_iam::operation::create_policy_version::CreatePolicyVersionError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;

        output
            .policy_version()
            .and_then(|v| v.version_id())
            .map(ToString::to_string)
            .ok_or_else(|| {
                ProviderError::backend("CreatePolicyVersion", "response carried no version id")
            })
    }

    async fn list_policy_versions(
        &self,
        policy_arn: &str,
    ) -> Result<Vec<PolicyVersion>, ProviderError> {
        let output = self
            .client
            .list_policy_versions()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "ListPolicyVersions",
                    policy_arn,
                    &e,
                    aws_sdk_iam::operation::list_policy_versions::ListPolicyVersionsError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;

        Ok(output
            .versions()
            .iter()
            .filter_map(|v| {
                Some(PolicyVersion {
                    version_id: v.version_id()?.to_string(),
                    is_default: v.is_default_version(),
                    create_date: v.create_date().and_then(to_chrono),
                })
            })
            .collect())
    }

    async fn delete_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "DeletePolicyVersion",
                    &format!("{policy_arn} version {version_id}"),
                    &e,
                    aws_sdk_iam::operation::delete_policy_version::DeletePolicyVersionError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), ProviderError> {
        self.client
            .delete_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "DeletePolicy",
                    policy_arn,
                    &e,
                    aws_sdk_iam::operation::delete_policy::DeletePolicyError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;
        Ok(())
    }

    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
    ) -> Result<String, ProviderError> {
        let output = self
            .client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_document)
            .description("Grantee for secret read access, managed by secret-access-controller")
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "CreateRole",
                    name,
                    &e,
                    |_| false,
                    aws_sdk_iam::operation::create_role::CreateRoleError::is_entity_already_exists_exception,
                )
            })?;

        output
            .role()
            .map(|r| r.arn().to_string())
            .ok_or_else(|| ProviderError::backend("CreateRole", "response carried no role"))
    }

    async fn get_role_arn(&self, name: &str) -> Result<String, ProviderError> {
        let output = self
            .client
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "GetRole",
                    name,
                    &e,
                    aws_sdk_iam::operation::get_role::GetRoleError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;

        output
            .role()
            .map(|r| r.arn().to_string())
            .ok_or_else(|| ProviderError::backend("GetRole", "response carried no role"))
    }

    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        trust_document: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .update_assume_role_policy()
            .role_name(role_name)
            .policy_document(trust_document)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "UpdateAssumeRolePolicy",
                    role_name,
                    &e,
                    aws_sdk_iam::operation::update_assume_role_policy::UpdateAssumeRolePolicyError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;
        Ok(())
    }

    async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "AttachRolePolicy",
                    role_name,
                    &e,
                    aws_sdk_iam::operation::attach_role_policy::AttachRolePolicyError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;
        Ok(())
    }

    async fn detach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "DetachRolePolicy",
                    role_name,
                    &e,
                    aws_sdk_iam::operation::detach_role_policy::DetachRolePolicyError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<(), ProviderError> {
        self.client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| {
                iam_error(
                    "DeleteRole",
                    role_name,
                    &e,
                    aws_sdk_iam::operation::delete_role::DeleteRoleError::is_no_such_entity_exception,
                    |_| false,
                )
            })?;
        Ok(())
    }
}

/// Secrets Manager client backed by the AWS SDK
#[derive(Debug, Clone)]
pub struct SdkSecrets {
    client: aws_sdk_secretsmanager::Client,
}

impl SdkSecrets {
    #[must_use]
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

fn secrets_error<E, R>(
    operation: &str,
    subject: &str,
    err: &aws_sdk_secretsmanager::error::SdkError<E, R>,
    missing: impl Fn(&E) -> bool,
    exists: impl Fn(&E) -> bool,
) -> ProviderError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service) if missing(service) => ProviderError::NotFound(subject.to_string()),
        Some(service) if exists(service) => ProviderError::AlreadyExists(subject.to_string()),
        _ => ProviderError::backend(
            operation,
            aws_sdk_secretsmanager::error::DisplayErrorContext(err).to_string(),
        ),
    }
}

#[async_trait]
impl SecretsApi for SdkSecrets {
    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        kms_key_id: Option<&str>,
    ) -> Result<String, ProviderError> {
        let output = self
            .client
            .create_secret()
            .name(name)
            .secret_string(value)
            .set_kms_key_id(kms_key_id.map(ToString::to_string))
            .send()
            .await
            .map_err(|e| {
                secrets_error(
                    "CreateSecret",
                    name,
                    &e,
                    |_| false,
                    aws_sdk_secretsmanager::operation::create_secret::CreateSecretError::is_resource_exists_exception,
                )
            })?;

        output
            .arn()
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::backend("CreateSecret", "response carried no ARN"))
    }

    async fn put_secret_value(
        &self,
        secret_id: &str,
        value: &str,
    ) -> Result<String, ProviderError> {
        let output = self
            .client
            .put_secret_value()
            .secret_id(secret_id)
            .secret_string(value)
            .send()
            .await
            .map_err(|e| {
                secrets_error(
                    "PutSecretValue",
                    secret_id,
                    &e,
                    aws_sdk_secretsmanager::operation::put_secret_value::PutSecretValueError::is_resource_not_found_exception,
                    |_| false,
                )
            })?;

        output
            .arn()
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::backend("PutSecretValue", "response carried no ARN"))
    }

    async fn describe_secret(&self, secret_id: &str) -> Result<SecretDescription, ProviderError> {
        let output = self
            .client
            .describe_secret()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                secrets_error(
                    "DescribeSecret",
                    secret_id,
                    &e,
                    aws_sdk_secretsmanager::operation::describe_secret::DescribeSecretError::is_resource_not_found_exception,
                    |_| false,
                )
            })?;

        Ok(SecretDescription {
            arn: output.arn().unwrap_or(secret_id).to_string(),
            last_changed: output.last_changed_date().and_then(to_chrono),
        })
    }

    async fn delete_secret(
        &self,
        secret_id: &str,
        recovery_window_days: Option<i64>,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let request = self.client.delete_secret().secret_id(secret_id);
        let request = match recovery_window_days {
            Some(days) => request.recovery_window_in_days(days),
            None => request.force_delete_without_recovery(true),
        };

        let output = request.send().await.map_err(|e| {
            secrets_error(
                "DeleteSecret",
                secret_id,
                &e,
                aws_sdk_secretsmanager::operation::delete_secret::DeleteSecretError::is_resource_not_found_exception,
                |_| false,
            )
        })?;

        Ok(output.deletion_date().and_then(to_chrono))
    }
}
