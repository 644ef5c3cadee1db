//! Secret Access Controller Library
//!
//! Provisions secrets in external backends from `ExternalSecret` resources
//! and grants scoped read access to them through `ExternalSecretAccess`
//! resources. Backends are declared with `ExternalSecretProvider`.
//!
//! Tests live next to the code in `#[cfg(test)]` modules and under `tests/`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;
