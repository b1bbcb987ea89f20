use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use genie_core::BridgeConfig;
use genie_core::log_files::create_log_file;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `-v` and the configured level. Logs go to stderr,
/// or to a fresh timestamped file when a log directory is configured, whose
/// path is returned.
pub fn init(config: &BridgeConfig, verbose: bool) -> Result<Option<PathBuf>> {
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(dir) = &config.log_path else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let (file, path) = create_log_file(dir, config.log_retention_days)
        .with_context(|| format!("Failed to create log file in {}", dir.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(Some(path))
}
