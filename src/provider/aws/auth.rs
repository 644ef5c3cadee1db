//! # AWS Authentication
//!
//! Loads SDK configuration through the default credential chain, which picks
//! up IRSA (IAM Roles for Service Accounts) when the controller runs on EKS.
//! An optional `roleArn` is assumed on top of those base credentials.

use super::policy::OidcProvider;
use crate::crd::AwsProviderConfig;
use crate::provider::ProviderError;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::info;

const SESSION_NAME: &str = "secret-access-controller";

/// Build the SDK configuration for one provider instance
pub async fn load_sdk_config(config: &AwsProviderConfig) -> SdkConfig {
    let region = config.region.clone().map(Region::new);

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region.clone() {
        loader = loader.region(region);
    }
    let base = loader.load().await;

    let Some(role_arn) = &config.role_arn else {
        info!("Using default credential chain (IRSA when running on EKS)");
        return base;
    };

    info!(role.arn = %role_arn, "Assuming role for provider");
    let assume_role = AssumeRoleProvider::builder(role_arn)
        .session_name(SESSION_NAME)
        .configure(&base)
        .build()
        .await;

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).credentials_provider(assume_role);
    if let Some(region) = region {
        loader = loader.region(region);
    }
    loader.load().await
}

/// Resolve the cluster OIDC provider from configuration
///
/// An explicit `oidcProviderArn` wins. Otherwise the ARN is derived from
/// `oidcIssuer` and the account id, which is looked up through STS when not
/// configured. Returns `None` when neither is set.
///
/// # Errors
///
/// `Config` when the ARN is malformed or the account id cannot be resolved.
pub async fn resolve_oidc_provider(
    config: &AwsProviderConfig,
    sdk_config: &SdkConfig,
) -> Result<Option<OidcProvider>, ProviderError> {
    if let Some(arn) = &config.oidc_provider_arn {
        return OidcProvider::from_arn(arn).map(Some);
    }

    let Some(issuer) = &config.oidc_issuer else {
        return Ok(None);
    };

    let account = match &config.account_id {
        Some(account) => account.clone(),
        None => caller_account(sdk_config).await?,
    };

    OidcProvider::from_arn(&oidc_provider_arn(&account, issuer)).map(Some)
}

/// `arn:aws:iam::<account>:oidc-provider/<issuer without scheme>`
#[must_use]
pub fn oidc_provider_arn(account: &str, issuer: &str) -> String {
    let issuer = issuer
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("arn:aws:iam::{account}:oidc-provider/{issuer}")
}

async fn caller_account(sdk_config: &SdkConfig) -> Result<String, ProviderError> {
    let sts = aws_sdk_sts::Client::new(sdk_config);
    let identity = sts.get_caller_identity().send().await.map_err(|e| {
        ProviderError::Config(format!(
            "resolving account id: {}",
            aws_sdk_sts::error::DisplayErrorContext(&e)
        ))
    })?;

    identity
        .account()
        .map(ToString::to_string)
        .ok_or_else(|| ProviderError::Config("caller identity carried no account id".to_string()))
}
