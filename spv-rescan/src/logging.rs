//! Logging configuration for the rescan coordinator.
//!
//! Log lines go to stdout and, optionally, to an append-only log file. The
//! file is opened once at startup and written through a non-blocking writer
//! that is flushed when the [`LoggingGuard`] is dropped.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::client::config::LOG_FILE_NAME;
use crate::error::{LoggingError, LoggingResult};

/// Guard that must be kept alive to ensure log flushing on shutdown.
/// When this guard is dropped, all buffered log entries will be flushed.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, falls back to `RUST_LOG`, then INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to stdout.
    pub console: bool,
    /// Optional file logging configuration.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory holding the log file. Created if missing.
    pub log_dir: PathBuf,
    /// File name inside `log_dir`.
    pub file_name: String,
}

impl LogFileConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file_name: LOG_FILE_NAME.to_string(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }
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
/// Returns a `LoggingGuard` that must be kept alive for the duration of the
/// application. If neither console nor file output is enabled, logging is
/// disabled and Ok is returned.
///
/// # Examples
///
/// ```no_run
/// use spv_rescan::logging::{init_logging, LogFileConfig, LoggingConfig};
/// use spv_rescan::LevelFilter;
///
/// let _guard = init_logging(LoggingConfig {
///     level: Some(LevelFilter::DEBUG),
///     console: true,
///     file: Some(LogFileConfig::new("/home/user/.spv-rescan")),
/// })
/// .unwrap();
/// ```
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
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = config
        .console
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stdout));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}

/// Create the log directory, open the log file for appending and wrap it in a
/// non-blocking writer.
fn setup_file_logging(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir).map_err(LoggingError::DirectoryCreation)?;
    let file = open_log_file(config)?;
    Ok(tracing_appender::non_blocking(file))
}

fn open_log_file(config: &LogFileConfig) -> LoggingResult<File> {
    let path = config.path();
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| LoggingError::FileOpen(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_file_appends() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogFileConfig::new(temp_dir.path());

        fs::write(config.path(), "INFO earlier run\n").unwrap();

        let mut file = open_log_file(&config).unwrap();
        writeln!(file, "INFO this run").unwrap();
        drop(file);

        let content = fs::read_to_string(config.path()).unwrap();
        assert_eq!(content, "INFO earlier run\nINFO this run\n");
    }

    #[test]
    fn test_setup_file_logging_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("nested").join("logs");
        assert!(!log_dir.exists());

        let config = LogFileConfig::new(&log_dir);
        let result = setup_file_logging(&config);
        assert!(result.is_ok());

        assert!(log_dir.exists());
        assert!(log_dir.join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_setup_file_logging_reports_unusable_directory() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();

        let result = setup_file_logging(&LogFileConfig::new(blocker.join("logs")));
        assert!(matches!(result, Err(LoggingError::DirectoryCreation(_))));
    }

    #[test]
    fn test_init_logging_no_output_succeeds() {
        let result = init_logging(LoggingConfig {
            level: Some(LevelFilter::INFO),
            console: false,
            file: None,
        });

        assert!(result.is_ok());
    }
}
