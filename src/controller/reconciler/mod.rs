//! # Reconciler
//!
//! Reconciliation logic for the three resource kinds.
//!
//! ## Module Structure
//!
//! - `types.rs` - Shared context and `ReconcilerError`
//! - `secret.rs` - `ExternalSecret` lifecycle (create, update, rotate, delete)
//! - `access.rs` - `ExternalSecretAccess` grant lifecycle
//! - `provider.rs` - Registry upkeep for `ExternalSecretProvider`
//! - `finalizer.rs` - Finalizer add/remove
//! - `status.rs` - Conditions and status writes

pub mod access;
pub mod finalizer;
pub mod provider;
pub mod secret;
pub mod status;
pub mod types;

pub use access::{reconcile_access, AccessLifecycle};
pub use provider::reconcile_provider;
pub use secret::{reconcile_secret, SecretLifecycle};
pub use status::Change;
pub use types::{Reconciler, ReconcilerError};
