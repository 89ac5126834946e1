//! Elevation check for firewall mutations.
//!
//! Re-verified on every create/delete attempt rather than cached: privilege
//! state is host-level, and the check is cheap compared to spawning the tool.

use crate::error::CoreError;

#[cfg(windows)]
mod sys {
    #[link(name = "shell32")]
    extern "system" {
        fn IsUserAnAdmin() -> i32;
    }

    pub fn is_elevated() -> bool {
        unsafe { IsUserAnAdmin() != 0 }
    }
}

#[cfg(not(windows))]
mod sys {
    pub fn is_elevated() -> bool {
        nix::unistd::geteuid().is_root()
    }
}

/// Whether the current process holds administrator rights.
pub fn is_elevated() -> bool {
    sys::is_elevated()
}

/// Fail fast with [`CoreError::Privilege`] when not elevated.
pub fn ensure_elevated() -> Result<(), CoreError> {
    if is_elevated() {
        Ok(())
    } else {
        Err(CoreError::Privilege(
            "run this program as administrator".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_elevated_matches_is_elevated() {
        match ensure_elevated() {
            Ok(()) => assert!(is_elevated()),
            Err(e) => {
                assert!(!is_elevated());
                assert_eq!(e.kind(), "Privilege");
            }
        }
    }
}
