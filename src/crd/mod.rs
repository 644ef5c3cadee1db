//! # Custom Resource Definitions
//!
//! CRD types for the secret access controller.
//!
//! ## Module Structure
//!
//! - `secret.rs` - `ExternalSecret`: a value stored in an external backend
//! - `access.rs` - `ExternalSecretAccess`: a read grant on one secret
//! - `provider.rs` - `ExternalSecretProvider`: a named backend instance
//! - `status.rs` - Condition type shared by all statuses

mod access;
mod provider;
mod secret;
mod status;

pub use access::{
    AccessSubject, ExternalIdentityRef, ExternalSecretAccess, ExternalSecretAccessSpec,
    ExternalSecretAccessStatus, ServiceAccountRef, Subject,
};
pub use provider::{
    AwsProviderConfig, ExternalSecretProvider, ExternalSecretProviderSpec, ProviderKind,
};
pub use secret::{ExternalSecret, ExternalSecretSpec, ExternalSecretStatus, RandomSpec, ValueSource};
pub use status::{find_condition, remove_condition, set_condition, Condition};
