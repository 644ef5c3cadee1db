//! # Secret Access Controller
//!
//! A Kubernetes controller that provisions secrets in external backends and
//! grants workloads scoped, rotating access to them.
//!
//! ## Overview
//!
//! 1. **ExternalSecret** - creates the backend secret from a literal, a
//!    generated random value (optionally rotated on a schedule) or a
//!    placeholder for externally managed values
//! 2. **ExternalSecretAccess** - grants read access on one secret to Kubernetes
//!    service accounts and foreign cloud identities
//! 3. **ExternalSecretProvider** - declares a named backend instance
//!
//! Backend objects are torn down before the finalizer is released.

use anyhow::Result;
use secret_access_controller::runtime::{initialization, watch_loop};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;
    info!(?init, "Initialization complete");

    watch_loop::run_watch_loop(init.reconciler, init.server_state).await
}
