//! Core run logic: process location, cycle scheduling, supervision.
//!
//! - [`locator`] — target matching and process-table polling
//! - [`scheduler`] — the ban/unblock/reblock state machine
//! - [`supervisor`] — run spawning, cancellation, cleanup guarantee
//! - [`maintenance`] — pre-run purge of the target's error logs

pub mod locator;
pub mod maintenance;
pub mod scheduler;
pub mod supervisor;

pub use locator::{ProcessEntry, ProcessHandle, ProcessTable, SysinfoTable, TargetProcess};
pub use scheduler::{CycleConfig, CycleScheduler, RunState, TerminationReason};
pub use supervisor::{RunHandle, RunRequest, Supervisor};
