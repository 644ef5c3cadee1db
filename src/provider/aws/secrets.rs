//! # Secrets Manager Operations
//!
//! Secret create / update / delete / drift check over [`SecretsApi`].

use super::client::SecretsApi;
use super::{KMS_KEY_ARN, SECRET_ARN};
use crate::crd::ExternalSecret;
use crate::provider::{BackendHandles, ProviderError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// `providerSpec` key selecting the KMS key used to encrypt the secret
pub const KMS_KEY_OPTION: &str = "KmsKeyArn";

/// Recovery windows Secrets Manager accepts for scheduled deletion
const RECOVERY_WINDOW_DAYS: std::ops::RangeInclusive<i64> = 7..=30;

/// Identifier to address the backend secret with: the recorded ARN when
/// there is one, the declared name otherwise
fn secret_id(secret: &ExternalSecret, handles: &BackendHandles) -> String {
    handles
        .get(SECRET_ARN)
        .cloned()
        .unwrap_or_else(|| secret.external_name())
}

pub async fn create_secret(
    api: &dyn SecretsApi,
    secret: &ExternalSecret,
    value: &str,
    handles: &mut BackendHandles,
) -> Result<(), ProviderError> {
    let name = secret.external_name();

    // A previous attempt already created or adopted it
    if let Some(arn) = handles.get(SECRET_ARN).cloned() {
        if secret.spec.external {
            debug!(secret.name = %name, "Secret ARN already recorded, content is external");
            return Ok(());
        }
        debug!(secret.name = %name, "Secret ARN already recorded, writing value");
        let arn = api.put_secret_value(&arn, value).await?;
        handles.insert(SECRET_ARN.to_string(), arn);
        return Ok(());
    }

    let kms_key = secret.spec.provider_spec.get(KMS_KEY_OPTION);
    let arn = match api
        .create_secret(&name, value, kms_key.map(String::as_str))
        .await
    {
        Ok(arn) => {
            info!(secret.name = %name, "Created secret");
            arn
        }
        Err(ProviderError::AlreadyExists(_)) if secret.spec.overwrite && secret.spec.external => {
            // The content belongs to whoever manages it; only take the handle
            warn!(secret.name = %name, "Secret already exists, adopting it without writing");
            api.describe_secret(&name).await?.arn
        }
        Err(ProviderError::AlreadyExists(_)) if secret.spec.overwrite => {
            warn!(secret.name = %name, "Secret already exists, adopting it");
            api.put_secret_value(&name, value).await?
        }
        Err(ProviderError::AlreadyExists(_)) => {
            return Err(ProviderError::backend(
                "CreateSecret",
                format!("secret '{name}' already exists; set overwrite to adopt it"),
            ));
        }
        Err(e) => return Err(e),
    };

    handles.insert(SECRET_ARN.to_string(), arn);
    if let Some(kms_key) = kms_key {
        handles.insert(KMS_KEY_ARN.to_string(), kms_key.clone());
    }
    Ok(())
}

pub async fn update_secret(
    api: &dyn SecretsApi,
    secret: &ExternalSecret,
    value: &str,
    handles: &mut BackendHandles,
) -> Result<(), ProviderError> {
    let id = secret_id(secret, handles);
    let arn = api.put_secret_value(&id, value).await?;
    info!(secret.name = %secret.external_name(), "Updated secret value");
    handles.insert(SECRET_ARN.to_string(), arn);
    Ok(())
}

pub async fn last_changed(
    api: &dyn SecretsApi,
    secret: &ExternalSecret,
    handles: &BackendHandles,
) -> Result<Option<DateTime<Utc>>, ProviderError> {
    let description = api.describe_secret(&secret_id(secret, handles)).await?;
    Ok(description.last_changed)
}

pub async fn delete_secret(
    api: &dyn SecretsApi,
    secret: &ExternalSecret,
    handles: &BackendHandles,
) -> Result<Option<DateTime<Utc>>, ProviderError> {
    let window = match secret.spec.recovery_window {
        0 => None,
        days if RECOVERY_WINDOW_DAYS.contains(&days) => Some(days),
        days => {
            return Err(ProviderError::InvalidRequest(format!(
                "recoveryWindow must be 0 or between {} and {} days, got {days}",
                RECOVERY_WINDOW_DAYS.start(),
                RECOVERY_WINDOW_DAYS.end()
            )))
        }
    };

    let id = secret_id(secret, handles);
    match api.delete_secret(&id, window).await {
        Ok(deletion_date) => {
            info!(secret.id = %id, recovery_window = ?window, "Deleted secret");
            Ok(deletion_date)
        }
        Err(e) if e.is_not_found() => {
            debug!(secret.id = %id, "Secret already absent");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
