//! PowerShell `NetSecurity` cmdlet backend.
//!
//! Invokes `powershell -NoProfile -Command` with `New-NetFirewallRule` /
//! `Remove-NetFirewallRule`. Behaviorally equivalent to the netsh backend:
//! both operate on the same reserved rule name, so a rule created by one is
//! deletable by the other.

use crate::error::CoreError;

use super::{check_create_preconditions, privilege, run_tool, FirewallBackend};

pub struct PowerShellBackend;

impl PowerShellBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PowerShellBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FirewallBackend for PowerShellBackend {
    async fn create_block_rule(&self, rule_name: &str, program_path: &str) -> Result<(), CoreError> {
        check_create_preconditions(program_path)?;

        let args = invocation_args(build_create_command(rule_name, program_path));
        let out = run_tool("powershell", &args).await?;
        if out.success {
            tracing::debug!("powershell created rule '{rule_name}' for {program_path}");
            Ok(())
        } else {
            Err(CoreError::BackendCommand(format!(
                "New-NetFirewallRule failed: {}",
                out.combined().trim()
            )))
        }
    }

    async fn delete_rule(&self, rule_name: &str) -> Result<(), CoreError> {
        privilege::ensure_elevated()?;

        let args = invocation_args(build_remove_command(rule_name));
        let out = run_tool("powershell", &args).await?;
        if out.success {
            tracing::debug!("powershell deleted rule '{rule_name}'");
            return Ok(());
        }
        if is_rule_absent_output(&out.combined()) {
            tracing::debug!("powershell reports rule '{rule_name}' absent; treating as deleted");
            return Ok(());
        }
        Err(CoreError::BackendCommand(format!(
            "Remove-NetFirewallRule failed: {}",
            out.combined().trim()
        )))
    }
}

/// Wrap a cmdlet string into the `powershell` argv.
fn invocation_args(command: String) -> Vec<String> {
    vec!["-NoProfile".into(), "-Command".into(), command]
}

fn build_create_command(rule_name: &str, program_path: &str) -> String {
    format!(
        "New-NetFirewallRule -DisplayName '{rule_name}' -Direction Outbound \
         -Program '{program_path}' -Action Block"
    )
}

fn build_remove_command(rule_name: &str) -> String {
    format!("Remove-NetFirewallRule -DisplayName '{rule_name}'")
}

/// Whether the cmdlet error stream reports "no such rule".
/// `Remove-NetFirewallRule` emits `No MSFT_NetFirewallRule objects found…`;
/// localized hosts may emit translated "not found" phrasing instead.
fn is_rule_absent_output(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("no msft_netfirewallrule objects found")
        || lower.contains("not found")
        || output.contains("找不到")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_shape() {
        let cmd = build_create_command("TestRule", r"C:\Games\app.exe");
        assert_eq!(
            cmd,
            "New-NetFirewallRule -DisplayName 'TestRule' -Direction Outbound \
             -Program 'C:\\Games\\app.exe' -Action Block"
        );
    }

    #[test]
    fn test_remove_command_shape() {
        assert_eq!(
            build_remove_command("TestRule"),
            "Remove-NetFirewallRule -DisplayName 'TestRule'"
        );
    }

    #[test]
    fn test_invocation_suppresses_profile() {
        let args = invocation_args("Get-Date".into());
        assert_eq!(args, vec!["-NoProfile", "-Command", "Get-Date"]);
    }

    #[test]
    fn test_rule_absent_detected_from_cmdlet_error() {
        assert!(is_rule_absent_output(
            "Remove-NetFirewallRule : No MSFT_NetFirewallRule objects found \
             with property 'DisplayName' equal to 'TestRule'."
        ));
    }

    #[test]
    fn test_rule_absent_detected_from_generic_not_found() {
        assert!(is_rule_absent_output("The specified rule was Not Found."));
    }

    #[test]
    fn test_genuine_failure_not_classified_as_absent() {
        assert!(!is_rule_absent_output(
            "Access is denied. (Exception from HRESULT: 0x80070005)"
        ));
    }
}
