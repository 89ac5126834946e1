//! `netsh advfirewall` backend.
//!
//! Invokes `netsh.exe` by absolute path under `%WINDIR%\System32`, falling
//! back to `SysWOW64` where filesystem redirection hides the System32 copy
//! from 32-bit hosts.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

use super::{check_create_preconditions, privilege, run_tool, FirewallBackend};

pub struct NetshBackend {
    netsh_path: PathBuf,
}

impl NetshBackend {
    pub fn new() -> Self {
        Self {
            netsh_path: resolve_netsh_path(&windir()),
        }
    }

    fn program(&self) -> String {
        self.netsh_path.to_string_lossy().into_owned()
    }
}

impl Default for NetshBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FirewallBackend for NetshBackend {
    async fn create_block_rule(&self, rule_name: &str, program_path: &str) -> Result<(), CoreError> {
        check_create_preconditions(program_path)?;

        let args = build_add_args(rule_name, program_path);
        let out = run_tool(&self.program(), &args).await?;
        if out.success {
            tracing::debug!("netsh created rule '{rule_name}' for {program_path}");
            Ok(())
        } else {
            Err(CoreError::BackendCommand(format!(
                "netsh add rule failed: {}",
                out.combined().trim()
            )))
        }
    }

    async fn delete_rule(&self, rule_name: &str) -> Result<(), CoreError> {
        privilege::ensure_elevated()?;

        let args = build_delete_args(rule_name);
        let out = run_tool(&self.program(), &args).await?;
        if out.success {
            tracing::debug!("netsh deleted rule '{rule_name}'");
            return Ok(());
        }
        if is_rule_absent_output(&out.combined()) {
            tracing::debug!("netsh reports rule '{rule_name}' absent; treating as deleted");
            return Ok(());
        }
        Err(CoreError::BackendCommand(format!(
            "netsh delete rule failed: {}",
            out.combined().trim()
        )))
    }
}

/// Arguments for `netsh advfirewall firewall add rule`.
fn build_add_args(rule_name: &str, program_path: &str) -> Vec<String> {
    vec![
        "advfirewall".into(),
        "firewall".into(),
        "add".into(),
        "rule".into(),
        format!("name={rule_name}"),
        "dir=out".into(),
        format!("program={program_path}"),
        "action=block".into(),
    ]
}

/// Arguments for `netsh advfirewall firewall delete rule`.
fn build_delete_args(rule_name: &str) -> Vec<String> {
    vec![
        "advfirewall".into(),
        "firewall".into(),
        "delete".into(),
        "rule".into(),
        format!("name={rule_name}"),
    ]
}

/// Whether the tool output reports "no such rule". netsh localizes this
/// message; match the English and Simplified Chinese spellings.
fn is_rule_absent_output(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("no rules match") || output.contains("找不到指定的规则")
}

fn windir() -> PathBuf {
    std::env::var_os("WINDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"))
}

/// Absolute path to `netsh.exe`, handling 32-on-64 filesystem redirection.
fn resolve_netsh_path(windir: &Path) -> PathBuf {
    let system32 = windir.join("System32").join("netsh.exe");
    if system32.exists() {
        return system32;
    }
    let syswow64 = windir.join("SysWOW64").join("netsh.exe");
    if syswow64.exists() {
        return syswow64;
    }
    system32
}
