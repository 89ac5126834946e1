//! netcycle — cyclic outbound network blocker for a target process.
//!
//! Once the configured executable launches, a supervised background task
//! alternately deletes and creates a single Windows Firewall outbound-block
//! rule for it on an operator-tuned rhythm, until the process exits or the
//! run is cancelled. Cancellation and process exit both end with the rule
//! removed.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod firewall;

pub use crate::core::{
    CycleConfig, RunHandle, RunRequest, Supervisor, TargetProcess, TerminationReason,
};
pub use crate::db::ConfigStore;
pub use crate::error::CoreError;
pub use crate::firewall::BackendChoice;
