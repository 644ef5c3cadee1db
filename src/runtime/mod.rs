//! # Runtime
//!
//! Process-level wiring: startup, the controller watch loop and the retry
//! policy applied to failed reconciliations.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
