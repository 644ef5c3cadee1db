//! # Finalizer
//!
//! Adds and removes the controller's finalizer with JSON merge patches.

use crate::constants::{FIELD_MANAGER, FINALIZER};
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

#[must_use]
pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Append the finalizer unless already present
///
/// # Errors
///
/// Returns the API error when the patch fails.
pub async fn add<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    if has_finalizer(obj) {
        return Ok(());
    }

    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(api, &obj.name_any(), finalizers).await?;
    debug!(resource.name = %obj.name_any(), "Added finalizer");
    Ok(())
}

/// Drop the finalizer, letting Kubernetes delete the object
///
/// # Errors
///
/// Returns the API error when the patch fails.
pub async fn remove<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    if !has_finalizer(obj) {
        return Ok(());
    }

    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    patch_finalizers(api, &obj.name_any(), finalizers).await?;
    debug!(resource.name = %obj.name_any(), "Removed finalizer");
    Ok(())
}

async fn patch_finalizers<K>(
    api: &Api<K>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}
