//! # Controller
//!
//! Core controller modules for the Secret Access Controller.
//!
//! - `backoff`: Per-resource exponential backoff and the shared retry bucket
//! - `reconciler`: Reconciliation logic for secrets, access grants and providers
//! - `rotation`: Random value generation and rotation scheduling
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod rotation;
pub mod server;
