//! Firewall rule mutation backends.
//!
//! Exactly one logical outbound-block rule (named [`crate::config::RULE_NAME`])
//! exists per run; it is either present (blocking) or absent. Two command-line
//! backends mutate it, behaviorally equivalent from the caller's perspective:
//! - `netsh`: `netsh advfirewall firewall add|delete rule` (`netsh_backend`)
//! - `powershell`: `New-NetFirewallRule` / `Remove-NetFirewallRule`
//!   (`powershell_backend`)
//!
//! Both re-verify elevation on every call and normalize the tool's
//! "rule not found" output on delete to success, so callers never distinguish
//! "deleted" from "was already absent".

pub mod netsh_backend;
pub mod powershell_backend;
pub mod privilege;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub use netsh_backend::NetshBackend;
pub use powershell_backend::PowerShellBackend;

/// Capability set over the host firewall: create the outbound-block rule for
/// a program path, and delete a named rule.
///
/// `delete_rule` is idempotent: deleting a rule that does not exist returns
/// `Ok`, identically to deleting one that exists.
#[async_trait::async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Create an outbound-block rule for `program_path` under `rule_name`.
    ///
    /// Fails fast with [`CoreError::Privilege`] when not elevated and with
    /// [`CoreError::Configuration`] when `program_path` is empty.
    async fn create_block_rule(&self, rule_name: &str, program_path: &str) -> Result<(), CoreError>;

    /// Delete the rule named `rule_name`. "Rule not found" is a successful
    /// no-op; any other failure surfaces as [`CoreError::BackendCommand`].
    async fn delete_rule(&self, rule_name: &str) -> Result<(), CoreError>;
}

/// Which command-line tool executes rule mutations. Fixed for the lifetime
/// of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    Netsh,
    PowerShell,
}

impl BackendChoice {
    /// The string persisted in the config store for this choice.
    pub fn as_store_value(&self) -> &'static str {
        match self {
            BackendChoice::Netsh => "netsh",
            BackendChoice::PowerShell => "powershell",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_store_value())
    }
}

impl FromStr for BackendChoice {
    type Err = CoreError;

    /// Accepts the store values plus the legacy `cmd_netsh` spelling written
    /// by older releases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netsh" | "cmd_netsh" => Ok(BackendChoice::Netsh),
            "powershell" => Ok(BackendChoice::PowerShell),
            other => Err(CoreError::Configuration(format!(
                "unknown firewall backend '{other}' (expected 'netsh' or 'powershell')"
            ))),
        }
    }
}

/// Instantiate the backend selected by `choice`.
pub fn backend_for(choice: BackendChoice) -> Box<dyn FirewallBackend> {
    match choice {
        BackendChoice::Netsh => Box::new(NetshBackend::new()),
        BackendChoice::PowerShell => Box::new(PowerShellBackend::new()),
    }
}

/// Captured result of one firewall tool invocation.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Combined stdout + stderr, used for "rule not found" classification:
    /// netsh reports the condition on stdout, PowerShell on stderr.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run a firewall tool and capture its exit status and output.
///
/// Invoked without a shell; arguments are passed as separate argv entries so
/// paths with spaces need no quoting here.
pub(crate) async fn run_tool(program: &str, args: &[String]) -> Result<ToolOutput, CoreError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CoreError::Io(format!("failed to launch {program}: {e}")))?;

    Ok(ToolOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Shared precondition checks for `create_block_rule`.
pub(crate) fn check_create_preconditions(program_path: &str) -> Result<(), CoreError> {
    privilege::ensure_elevated()?;
    if program_path.trim().is_empty() {
        return Err(CoreError::Configuration(
            "no target executable path configured".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_choice_from_store_values() {
        assert_eq!("netsh".parse::<BackendChoice>().unwrap(), BackendChoice::Netsh);
        assert_eq!(
            "powershell".parse::<BackendChoice>().unwrap(),
            BackendChoice::PowerShell
        );
    }

    #[test]
    fn test_backend_choice_accepts_legacy_spelling() {
        assert_eq!(
            "cmd_netsh".parse::<BackendChoice>().unwrap(),
            BackendChoice::Netsh
        );
    }

    #[test]
    fn test_backend_choice_case_insensitive() {
        assert_eq!(
            "PowerShell".parse::<BackendChoice>().unwrap(),
            BackendChoice::PowerShell
        );
    }

    #[test]
    fn test_backend_choice_rejects_unknown_tool() {
        let err = "iptables".parse::<BackendChoice>().unwrap_err();
        assert_eq!(err.kind(), "Configuration");
        assert!(err.to_string().contains("iptables"));
    }

    #[test]
    fn test_backend_choice_round_trips_through_store_value() {
        for choice in [BackendChoice::Netsh, BackendChoice::PowerShell] {
            assert_eq!(choice.as_store_value().parse::<BackendChoice>().unwrap(), choice);
        }
    }

    #[test]
    fn test_empty_program_path_is_configuration_error() {
        // Elevation is checked first, so this assertion only holds when the
        // test runs elevated; guard on it rather than requiring root.
        if privilege::is_elevated() {
            let err = check_create_preconditions("  ").unwrap_err();
            assert_eq!(err.kind(), "Configuration");
        }
    }

    #[test]
    fn test_tool_output_combined_contains_both_streams() {
        let out = ToolOutput {
            success: false,
            stdout: "Ok.".into(),
            stderr: "No rules match the specified criteria.".into(),
        };
        let combined = out.combined();
        assert!(combined.contains("Ok."));
        assert!(combined.contains("No rules match"));
    }
}
