//! Logging configuration and file rotation for the wallet connectivity layer.

use std::fs::{self, File};
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{LoggingError, LoggingResult};

/// Prefix for archived log files.
const LOG_FILE_PREFIX: &str = "lnwallet-net.";
/// Name of the active log file.
const ACTIVE_LOG_NAME: &str = "run.log";

/// Guard that must be kept alive to ensure log flushing on shutdown.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, falls back to `RUST_LOG` then INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to console (stderr).
    pub console: bool,
    /// Optional file logging configuration.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory where log files will be stored.
    pub log_dir: PathBuf,
    /// Maximum number of archived log files to keep.
    pub max_files: usize,
}

/// Initialize console-only logging with the given level.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Initialize logging with the given configuration.
///
/// Returns a [`LoggingGuard`] that must be kept alive for the duration of
/// the application; dropping it flushes buffered entries. If neither
/// console nor file output is enabled, tracing macros become no-ops.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _worker_guard: None,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, guard) = if let Some(ref file_config) = config.file {
        let (non_blocking, guard) = setup_file_logging(file_config)?;
        let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = if config.console {
        Some(fmt::layer().with_target(true).with_writer(std::io::stderr))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::Subscriber(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}

/// Archive the previous run's log, prune old archives, and open a fresh
/// non-blocking writer for the active log file.
fn setup_file_logging(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir)?;

    let active = config.log_dir.join(ACTIVE_LOG_NAME);
    if active.exists() {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let archived = config.log_dir.join(format!("{}{}.log", LOG_FILE_PREFIX, stamp));
        fs::rename(&active, &archived)?;
    }

    prune_archives(&config.log_dir, config.max_files)?;

    let file = File::create(&active)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    Ok((non_blocking, guard))
}

/// Remove the oldest archived logs so at most `max_files` remain.
fn prune_archives(log_dir: &Path, max_files: usize) -> LoggingResult<()> {
    let mut archives: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false)
        })
        .collect();

    if archives.len() <= max_files {
        return Ok(());
    }

    // Archive names embed the timestamp, so lexicographic order is age order.
    archives.sort();
    let excess = archives.len() - max_files;
    for path in archives.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to prune archived log {}: {}", path.display(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_newest_archives() {
        let dir = std::env::temp_dir().join(format!("lnwallet-net-logs-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        for i in 0..5 {
            let name = dir.join(format!("{}20240101-00000{}.log", LOG_FILE_PREFIX, i));
            fs::write(name, b"x").unwrap();
        }

        prune_archives(&dir, 2).unwrap();

        let remaining: Vec<_> = fs::read_dir(&dir).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(remaining.len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disabled_logging_returns_inert_guard() {
        let guard = init_logging(LoggingConfig {
            level: None,
            console: false,
            file: None,
        });
        assert!(guard.is_ok());
    }
}
