//! # Status
//!
//! Condition bookkeeping and status subresource writes.

use super::types::ReconcilerError;
use crate::constants::{
    CONDITION_AVAILABLE, CONDITION_UNAVAILABLE, FIELD_MANAGER, REASON_CREATED,
    REASON_CREATION_FAILED, REASON_UPDATED,
};
use crate::crd::{find_condition, remove_condition, set_condition, Condition};
use kube::api::{Api, Patch, PatchParams};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// What a successful reconciliation did to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Mark the resource available after a successful pass
pub fn record_success(conditions: &mut Vec<Condition>, change: Change) {
    remove_condition(conditions, CONDITION_UNAVAILABLE);

    let (reason, message) = match change {
        Change::Created => (REASON_CREATED, "created in backend"),
        Change::Updated => (REASON_UPDATED, "updated in backend"),
        Change::Unchanged => {
            let available = find_condition(conditions, CONDITION_AVAILABLE)
                .is_some_and(|c| c.status == "True");
            if available {
                return;
            }
            (REASON_UPDATED, "in sync with backend")
        }
    };
    set_condition(conditions, Condition::new(CONDITION_AVAILABLE, true, reason, message));
}

/// Mark the resource unavailable with the classified reason
///
/// A failure before the first successful creation is reported as
/// `CreationFailed`, with the underlying classification in the message.
pub fn record_failure(conditions: &mut Vec<Condition>, error: &ReconcilerError, first_create: bool) {
    let (reason, message) = if first_create {
        (REASON_CREATION_FAILED, format!("{}: {error}", error.reason()))
    } else {
        (error.reason(), error.to_string())
    };

    set_condition(
        conditions,
        Condition::new(CONDITION_UNAVAILABLE, true, reason, message.clone()),
    );
    set_condition(
        conditions,
        Condition::new(CONDITION_AVAILABLE, false, reason, message),
    );
}

/// Write `status` to the status subresource
///
/// # Errors
///
/// Returns the API error when the patch fails.
pub async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{REASON_CONTROLLER_ERROR, REASON_PROVIDER_ERROR};
    use crate::provider::ProviderError;

    fn reason<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a str> {
        find_condition(conditions, r#type).and_then(|c| c.reason.as_deref())
    }

    #[test]
    fn test_success_clears_unavailable() {
        let mut conditions = Vec::new();
        record_failure(
            &mut conditions,
            &ReconcilerError::Controller("bad pattern".into()),
            false,
        );
        assert_eq!(reason(&conditions, CONDITION_UNAVAILABLE), Some(REASON_CONTROLLER_ERROR));

        record_success(&mut conditions, Change::Updated);
        assert!(find_condition(&conditions, CONDITION_UNAVAILABLE).is_none());
        let available = find_condition(&conditions, CONDITION_AVAILABLE).unwrap();
        assert_eq!(available.status, "True");
        assert_eq!(available.reason.as_deref(), Some(REASON_UPDATED));
    }

    #[test]
    fn test_first_create_failure_is_creation_failed() {
        let mut conditions = Vec::new();
        let error = ReconcilerError::Provider(ProviderError::backend("CreateSecret", "denied"));
        record_failure(&mut conditions, &error, true);

        let unavailable = find_condition(&conditions, CONDITION_UNAVAILABLE).unwrap();
        assert_eq!(unavailable.reason.as_deref(), Some(REASON_CREATION_FAILED));
        let message = unavailable.message.as_deref().unwrap();
        assert!(message.starts_with(REASON_PROVIDER_ERROR), "{message}");
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_unchanged_keeps_created_reason() {
        let mut conditions = Vec::new();
        record_success(&mut conditions, Change::Created);
        record_success(&mut conditions, Change::Unchanged);
        assert_eq!(reason(&conditions, CONDITION_AVAILABLE), Some(REASON_CREATED));
        assert_eq!(conditions.len(), 1);
    }
}
