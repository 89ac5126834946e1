//! Target process location via process-table polling.
//!
//! The locator re-enumerates the OS process table every 3 seconds, matching
//! each entry's executable name against the target's name set and its
//! normalized, lower-cased executable path against the target's resolved
//! path. Entries whose path cannot be read (permission denied, already
//! exited) are skipped. First match wins; enumeration order is OS-defined.

use std::collections::HashSet;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};

use crate::config;
use crate::error::CoreError;

/// The executable a run throttles. Immutable once the controller starts.
///
/// Identity for matching is `(name ∈ executable_names) ∧ (normalized exe
/// path == resolved_path)`. The name set holds at least the file name of the
/// resolved path; aliases cover targets that ship the same binary under two
/// equivalent executable names.
#[derive(Debug, Clone)]
pub struct TargetProcess {
    executable_names: HashSet<String>,
    /// Path as supplied, used for rule creation and filesystem access.
    exe_path: String,
    /// Normalized, lower-cased form of `exe_path`, used for matching only.
    resolved_path: String,
}

impl TargetProcess {
    /// Build a target from an executable path, deriving the name set from
    /// the path's file name.
    pub fn from_path(raw_path: &str) -> Result<Self, CoreError> {
        if raw_path.trim().is_empty() {
            return Err(CoreError::Configuration(
                "target executable path is empty".into(),
            ));
        }
        let exe_path = raw_path.trim().to_string();
        let resolved_path = normalize_path(&exe_path);
        let file_name = std::path::Path::new(&resolved_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "target path '{raw_path}' has no file name component"
                ))
            })?;

        let mut executable_names = HashSet::new();
        executable_names.insert(file_name);
        Ok(Self {
            executable_names,
            exe_path,
            resolved_path,
        })
    }

    /// Add an equivalent executable name to match alongside the primary one.
    pub fn add_alias(&mut self, name: &str) {
        if !name.trim().is_empty() {
            self.executable_names.insert(name.trim().to_lowercase());
        }
    }

    /// The executable path as supplied by the operator.
    pub fn exe_path(&self) -> &str {
        &self.exe_path
    }

    /// The normalized, lower-cased resolved path.
    pub fn resolved_path(&self) -> &str {
        &self.resolved_path
    }

    /// The lower-cased executable names this target matches.
    pub fn executable_names(&self) -> &HashSet<String> {
        &self.executable_names
    }

    /// Whether a process-table entry identifies this target.
    pub fn matches(&self, name: &str, exe_path: &str) -> bool {
        self.executable_names.contains(&name.to_lowercase())
            && normalize_path(exe_path) == self.resolved_path
    }
}

/// Lower-case a path and unify its separators to the platform separator.
pub(crate) fn normalize_path(raw: &str) -> String {
    let sep = std::path::MAIN_SEPARATOR;
    raw.trim()
        .replace(['/', '\\'], &sep.to_string())
        .trim_end_matches(sep)
        .to_lowercase()
}

/// One row of the OS process table.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// `None` when the path could not be read; such entries are skipped.
    pub exe_path: Option<String>,
    /// Process start time (seconds since the Unix epoch).
    pub start_time: u64,
}

/// A located, live target process. The start time pins the identity of the
/// PID: a recycled PID carries a different start time.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub start_time: u64,
}

/// Process enumeration facility. Abstracted so the scheduler's state machine
/// is testable against a scripted table; production uses [`SysinfoTable`].
pub trait ProcessTable: Send + Sync {
    /// Snapshot the live process table.
    fn processes(&mut self) -> Vec<ProcessEntry>;

    /// Liveness re-check for a previously located process.
    fn is_running(&mut self, handle: &ProcessHandle) -> bool;
}

/// Production process table backed by the `sysinfo` crate.
pub struct SysinfoTable {
    system: System,
}

impl SysinfoTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoTable {
    fn processes(&mut self) -> Vec<ProcessEntry> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .iter()
            .map(|(pid, proc)| ProcessEntry {
                pid: pid.as_u32(),
                name: proc.name().to_string_lossy().into_owned(),
                exe_path: proc.exe().map(|p| p.to_string_lossy().into_owned()),
                start_time: proc.start_time(),
            })
            .collect()
    }

    fn is_running(&mut self, handle: &ProcessHandle) -> bool {
        let target = sysinfo::Pid::from_u32(handle.pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        let observed = self.system.process(target).map(|p| p.start_time());
        same_process(observed, handle)
    }
}

/// Whether an observed start time still identifies `handle`. The OS may hand
/// the target's PID to an unrelated process after it exits; such a process
/// must not keep the run alive.
fn same_process(observed_start: Option<u64>, handle: &ProcessHandle) -> bool {
    observed_start == Some(handle.start_time)
}

/// Scan the table once for the first entry matching `target`.
fn scan(table: &mut dyn ProcessTable, target: &TargetProcess) -> Option<ProcessHandle> {
    for entry in table.processes() {
        let Some(exe_path) = entry.exe_path.as_deref() else {
            continue;
        };
        if target.matches(&entry.name, exe_path) {
            return Some(ProcessHandle {
                pid: entry.pid,
                start_time: entry.start_time,
                name: entry.name,
            });
        }
    }
    None
}

/// Poll the process table until `target` appears or `timeout` elapses.
///
/// Scans at least once, then every 3 seconds. On timeout returns
/// [`CoreError::NotFound`]; the caller must abort the run without creating
/// any firewall rule.
pub async fn locate(
    table: &mut dyn ProcessTable,
    target: &TargetProcess,
    timeout: Duration,
) -> Result<ProcessHandle, CoreError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(handle) = scan(table, target) {
            tracing::info!(
                "target process detected: {} (PID {})",
                handle.name,
                handle.pid
            );
            return Ok(handle);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::NotFound(timeout));
        }
        tracing::debug!("target not running yet; next poll in {}s", config::PROCESS_POLL_INTERVAL_SECS);
        tokio::time::sleep(Duration::from_secs(config::PROCESS_POLL_INTERVAL_SECS)).await;
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::FakeTable;
    use super::*;

    fn entry(pid: u32, name: &str, path: Option<&str>) -> ProcessEntry {
        ProcessEntry {
            pid,
            name: name.into(),
            exe_path: path.map(String::from),
            start_time: 1_000,
        }
    }

    #[test]
    fn test_normalize_path_lowercases_and_unifies_separators() {
        assert_eq!(
            normalize_path(r"C:\Games\App\app.exe"),
            normalize_path("c:/games/app/APP.EXE")
        );
    }

    #[test]
    fn test_normalize_path_strips_trailing_separator() {
        assert_eq!(normalize_path("a/b/"), normalize_path(r"a\b"));
    }

    #[test]
    fn test_target_from_path_rejects_empty() {
        assert_eq!(
            TargetProcess::from_path("   ").unwrap_err().kind(),
            "Configuration"
        );
    }

    #[test]
    fn test_target_matches_primary_name_and_path() {
        let target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        assert!(target.matches("app.exe", r"c:\games\app\APP.exe"));
        assert!(target.matches("APP.EXE", "c:/games/app/app.exe"));
    }

    #[test]
    fn test_target_rejects_same_name_different_path() {
        let target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        assert!(!target.matches("app.exe", r"c:\other\app.exe"));
    }

    #[test]
    fn test_target_matches_alias_name() {
        let mut target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        target.add_alias("App-Alt.exe");
        assert!(target.matches("app-alt.exe", r"c:\games\app\app.exe"));
        assert!(!target.matches("unrelated.exe", r"c:\games\app\app.exe"));
    }

    #[test]
    fn test_recycled_pid_not_treated_as_running() {
        let handle = ProcessHandle {
            pid: 42,
            name: "app.exe".into(),
            start_time: 1_000,
        };
        assert!(same_process(Some(1_000), &handle));
        // Same PID, later start time: an unrelated process got the PID.
        assert!(!same_process(Some(2_000), &handle));
        assert!(!same_process(None, &handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_finds_first_match_in_enumeration_order() {
        let target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        let mut table = FakeTable::new(vec![
            entry(10, "other.exe", Some(r"c:\other\other.exe")),
            entry(20, "app.exe", Some(r"c:\games\app\app.exe")),
            entry(30, "app.exe", Some(r"c:\games\app\app.exe")),
        ]);

        let handle = locate(&mut table, &target, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(handle.pid, 20);
        assert_eq!(table.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_skips_entries_without_readable_path() {
        let target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        let mut table = FakeTable::new(vec![
            entry(10, "app.exe", None),
            entry(20, "app.exe", Some(r"c:\games\app\app.exe")),
        ]);

        let handle = locate(&mut table, &target, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(handle.pid, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_times_out_when_target_never_launches() {
        let target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        let mut table = FakeTable::new(vec![entry(10, "other.exe", Some(r"c:\o\other.exe"))]);

        let err = locate(&mut table, &target, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
        // 60s window at a 3s poll interval: scan at t=0 plus one per poll.
        assert_eq!(table.scans.load(Ordering::SeqCst), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_zero_timeout_still_scans_once() {
        let target = TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap();
        let mut table = FakeTable::new(vec![entry(
            20,
            "app.exe",
            Some(r"c:\games\app\app.exe"),
        )]);

        let handle = locate(&mut table, &target, Duration::ZERO).await.unwrap();
        assert_eq!(handle.pid, 20);
        assert_eq!(table.scans.load(Ordering::SeqCst), 1);
    }
}
