use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

const LOG_PREFIX: &str = "genie_";

/// Deletes `genie_*.log` files in `logs_dir` last modified before `max_age` ago.
///
/// Files that cannot be inspected or removed are skipped. Returns the number
/// of files deleted.
pub fn prune_logs(logs_dir: &Path, max_age: Duration) -> io::Result<usize> {
    if !logs_dir.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !is_genie_log(&path) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "Deleted old log file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete log file"),
            }
        }
    }

    Ok(removed)
}

fn is_genie_log(path: &Path) -> bool {
    let is_log = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("log"));
    let prefixed = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(LOG_PREFIX));
    is_log && prefixed && path.is_file()
}

/// Creates `genie_YYYYmmdd_HHMMSS.log` in `logs_dir`.
///
/// Creates the directory if needed and prunes logs older than
/// `retention_days` first.
pub fn create_log_file(logs_dir: &Path, retention_days: u64) -> io::Result<(fs::File, PathBuf)> {
    fs::create_dir_all(logs_dir)?;

    let max_age = Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60));
    prune_logs(logs_dir, max_age)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = logs_dir.join(format!("{LOG_PREFIX}{timestamp}.log"));
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    Ok((file, log_path))
}
