use std::path::PathBuf;

use clap::Parser;
use pgscope_core::config::{
    DEFAULT_CACHE_TTL_SECS, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_MAX_ROWS,
};
use pgscope_core::logging::{default_log_dir, LogConfig};
use pgscope_core::DatabaseSettings;

/// pgscope - safe query execution and schema browsing for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "pgscope")]
#[command(version)]
#[command(about = "Serves validated queries and schema resources for one PostgreSQL database over stdio", long_about = None)]
pub struct Args {
    /// PostgreSQL connection string (e.g. "host=localhost dbname=app user=app")
    #[arg(short = 'd', long = "dsn")]
    pub dsn: Option<String>,

    /// Environment variable holding the connection string (takes precedence over --dsn)
    #[arg(short = 'e', long = "env-var")]
    pub env_var: Option<String>,

    /// Default statement timeout in seconds (0 disables it)
    #[arg(long = "command-timeout", value_name = "SECONDS", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout: u32,

    /// Default row cap for reads
    #[arg(long = "max-rows", default_value_t = DEFAULT_MAX_ROWS)]
    pub max_rows: usize,

    /// Connect timeout in seconds
    #[arg(long = "connect-timeout", value_name = "SECONDS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u32,

    /// Metadata cache time-to-live in seconds
    #[arg(long = "cache-ttl", value_name = "SECONDS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl: u64,

    /// Log filter (overrides PGSCOPE_LOG and RUST_LOG)
    #[arg(long = "log-filter")]
    pub log_filter: Option<String>,

    /// Also write daily rotating log files
    #[arg(long = "log-file")]
    pub log_file: bool,

    /// Directory for log files (implies --log-file)
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Settings for the core, or a usage error message.
    pub fn settings(&self) -> Result<DatabaseSettings, String> {
        let connection_string = resolve_connection_string(
            self.dsn.as_deref(),
            self.env_var.as_deref(),
            |name| std::env::var(name).ok(),
        )?;

        Ok(DatabaseSettings::new(connection_string)
            .with_command_timeout_secs(self.command_timeout)
            .with_max_rows(self.max_rows)
            .with_connect_timeout_secs(self.connect_timeout)
            .with_cache_ttl_secs(self.cache_ttl))
    }

    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::default();
        if let Some(dir) = &self.log_dir {
            config = config.with_log_dir(dir);
        } else if self.log_file {
            config = config.with_log_dir(default_log_dir());
        }
        if let Some(filter) = &self.log_filter {
            config = config.with_filter(filter);
        }
        config
    }
}

/// Pick the connection string: a named environment variable wins over `--dsn`.
fn resolve_connection_string(
    dsn: Option<&str>,
    env_var: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, String> {
    if let Some(name) = env_var.filter(|name| !name.is_empty()) {
        return lookup(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| format!("Environment variable '{name}' not found or empty"));
    }

    dsn.filter(|dsn| !dsn.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| "No connection string provided. Use --dsn or --env-var option.".to_string())
}
