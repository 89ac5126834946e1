//! Centralized runtime constants for netcycle.
//!
//! All tunable intervals, bounds, and fixed identifiers are collected here so
//! they can be found and adjusted in a single place rather than scattered
//! across modules.

/// Fixed name of the single outbound-block firewall rule. Shared by both
/// command backends so a rule created by one is deletable by the other.
pub const RULE_NAME: &str = "NetcycleOutboundBlock";

/// Interval at which the locator re-enumerates the process table while
/// waiting for the target to launch (seconds).
pub const PROCESS_POLL_INTERVAL_SECS: u64 = 3;

/// Maximum time to wait for the target process to launch before the run is
/// abandoned with no firewall mutation (seconds).
pub const LAUNCH_WAIT_TIMEOUT_SECS: u64 = 60;

/// Upper bound for the delay between target launch and the first block (seconds).
pub const BAN_DELAY_MAX_SECS: u64 = 300;

/// Upper bound for the blocked portion of each cycle (seconds).
pub const INTERMITTENT_BLOCK_MAX_SECS: u64 = 30;

/// Upper bound for the unblocked (connect window) portion of each cycle (seconds).
pub const CONNECT_WINDOW_MAX_SECS: u64 = 120;

/// File name of the SQLite config/path store.
pub const STORE_FILE_NAME: &str = "netcycle.db";

/// Default delay between target launch and the first block (seconds).
pub const DEFAULT_BAN_DELAY_SECS: u64 = 60;

/// Default length of each blocked interval (seconds).
pub const DEFAULT_INTERMITTENT_BLOCK_SECS: u64 = 3;

/// Default length of each connect window (seconds).
pub const DEFAULT_CONNECT_WINDOW_SECS: u64 = 15;
