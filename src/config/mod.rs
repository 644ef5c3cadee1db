//! # Configuration
//!
//! Controller-level settings. Per-backend settings live on
//! `ExternalSecretProvider` resources and are decoded by each provider.

mod controller;

pub use controller::ControllerConfig;
