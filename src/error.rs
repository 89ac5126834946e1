//! Unified error type for the throttling core.
//!
//! `CoreError` is the single error type crossing module boundaries. Each
//! variant maps to a distinct failure domain with a distinct handling policy:
//! `Privilege` and `Configuration` abort a run before any firewall mutation,
//! `NotFound` ends a run cleanly, and `BackendCommand` is absorbed by the
//! scheduler loop (logged, retried on the next cycle).

use std::time::Duration;

/// Error returned by the locator, firewall backends, scheduler, and store.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Elevated (administrator) rights are missing. Not retried: retrying
    /// without remediation cannot succeed.
    #[error("administrator privileges required: {0}")]
    Privilege(String),

    /// Missing target path or out-of-range duration. Rejected before any
    /// firewall mutation.
    #[error("{0}")]
    Configuration(String),

    /// The target process did not launch within the wait window. A normal
    /// outcome for the overall system, not a fault.
    #[error("target process did not launch within {} seconds", .0.as_secs())]
    NotFound(Duration),

    /// The underlying firewall command failed for a reason other than
    /// "rule absent".
    #[error("{0}")]
    BackendCommand(String),

    /// Errors from the SQLite config/path store.
    #[error("{0}")]
    Store(String),

    /// I/O and OS-level errors (process spawning, filesystem).
    #[error("{0}")]
    Io(String),
}

impl CoreError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Privilege(_) => "Privilege",
            CoreError::Configuration(_) => "Configuration",
            CoreError::NotFound(_) => "NotFound",
            CoreError::BackendCommand(_) => "BackendCommand",
            CoreError::Store(_) => "Store",
            CoreError::Io(_) => "Io",
        }
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.to_string())
    }
}
