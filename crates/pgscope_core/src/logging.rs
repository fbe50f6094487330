//! Structured logging setup.
//!
//! Stdout carries the request/response stream, so console logs go to stderr.
//! A daily rotating log file can be added next to them. The filter comes from
//! an explicit value, then `PGSCOPE_LOG`, then `RUST_LOG`, then the build-type
//! default.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for rotating log files; `None` logs to stderr only
    pub log_dir: Option<PathBuf>,
    /// Whether stderr is a terminal (enables ANSI colors)
    pub ansi: bool,
    /// Optional custom log filter
    pub log_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { log_dir: None, ansi: atty::is(atty::Stream::Stderr), log_filter: None }
    }
}

impl LogConfig {
    /// Also write daily rotating files to `log_dir`.
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Guard that must be held for the lifetime of the process.
///
/// Dropping it flushes pending file log entries.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Initialize logging. If the log file cannot be opened, falls back to
/// stderr only.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    let Some(log_dir) = config.log_dir.as_ref() else {
        return init_stderr_logging(&config);
    };

    match init_file_logging(&config, log_dir) {
        Ok(guard) => LoggingGuard { _worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {e}. Using stderr only.");
            init_stderr_logging(&config)
        }
    }
}

fn init_stderr_logging(config: &LogConfig) -> LoggingGuard {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(config.ansi)
        .with_target(false)
        .init();

    LoggingGuard { _worker_guard: None }
}

fn init_file_logging(
    config: &LogConfig,
    log_dir: &Path,
) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("pgscope")
        .filename_suffix("log")
        .build(log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr = std::io::stderr.with_max_level(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_writer(stderr.and(non_blocking))
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(guard)
}

fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env("PGSCOPE_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Default log filter for the build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "debug,pgscope=trace,pgscope_core=trace,tokio_postgres=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "info,pgscope=info,pgscope_core=info,tokio_postgres=warn"
    }
}

/// Default directory for log files.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pgscope")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_log_filter()).is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = LogConfig::default().with_log_dir("/tmp/pgscope-logs").with_filter("warn");
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/pgscope-logs")));
        assert_eq!(config.log_filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_default_log_dir_is_namespaced() {
        assert!(default_log_dir().ends_with("pgscope/logs"));
    }
}
