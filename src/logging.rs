//! # Logging
//!
//! Installs the global `tracing` subscriber: console output always, plus a
//! daily-rolling log file when a directory is configured.

use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{MonitorError, Result};

/// Prefix of the rolled log files
pub const LOG_FILE_PREFIX: &str = "uav-monitor.log";

/// Install the subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Returns
///
/// * `Option<WorkerGuard>` - Keep alive until exit so buffered file output
///   is flushed; `None` when logging to the console only
///
/// # Errors
///
/// Returns error if the level is not a valid filter, the log directory
/// cannot be created, or a subscriber is already installed
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => env_filter(&config.level)?,
    };

    let (file_layer, guard) = if config.file_dir.is_empty() {
        (None, None)
    } else {
        let (writer, guard) = file_writer(Path::new(&config.file_dir))?;
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| MonitorError::Logging(e.to_string()))?;

    Ok(guard)
}

fn env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| MonitorError::Logging(format!("invalid level '{}': {}", level, e)))
}

fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_filter_accepts_levels_and_directives() {
        assert!(env_filter("info").is_ok());
        assert!(env_filter("uav_monitor=debug,warn").is_ok());
    }

    #[test]
    fn test_env_filter_rejects_unknown_level() {
        let err = env_filter("uav_monitor=loud").unwrap_err();

        assert!(matches!(err, MonitorError::Logging(_)));
        assert!(err.to_string().contains("uav_monitor=loud"));
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs").join("monitor");

        let (_writer, _guard) = file_writer(&log_dir).unwrap();

        assert!(log_dir.is_dir());
    }
}
