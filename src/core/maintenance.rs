//! Pre-run purge of the target's error-report logs.
//!
//! Runs once after the target is located, before the first-block delay. The
//! target re-creates these logs when its network calls fail; purging stale
//! copies keeps the next run's reports attributable to the current session.
//! Every failure here is non-fatal: missing files and unreadable directories
//! are skipped and the run proceeds regardless.

use std::path::Path;

use super::locator::TargetProcess;

/// Log files the target writes when uploads or downloads fail.
const ERROR_LOG_FILES: [&str; 3] = ["DownloadError.log", "upload_err.log", "DownloadError.log.bak"];

/// Delete known error-report logs from each `<stem>_Data` directory next to
/// the target executable. Returns the number of files removed.
pub fn purge_error_logs(target: &TargetProcess) -> usize {
    let exe = Path::new(target.exe_path());
    let Some(program_dir) = exe.parent() else {
        return 0;
    };

    let mut removed = 0;
    for name in target.executable_names() {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        let data_dir = program_dir.join(format!("{stem}_Data"));
        if !data_dir.is_dir() {
            continue;
        }
        for file in ERROR_LOG_FILES {
            let path = data_dir.join(file);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("removed stale log {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!("could not remove {}: {e}", path.display());
                }
            }
        }
    }
    if removed > 0 {
        tracing::info!("purged {removed} stale error log(s)");
    }
    removed
}
