//! Runtime settings consumed by the core.
//!
//! The outer layer fills these from the command line or environment; the core
//! only reads them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PgScopeError, Result};

/// Default command timeout for ad-hoc statements, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u32 = 30;

/// Default row cap for reads.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Command timeout used for catalog introspection, in seconds.
pub const DEFAULT_METADATA_TIMEOUT_SECS: u32 = 60;

/// How long a connect attempt may take, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 15;

/// Metadata cache time-to-live (10 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;

/// Settings for database access.
///
/// The connection string is never logged or serialized back to callers.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// libpq-style connection string or `postgresql://` URL.
    #[serde(skip_serializing, default)]
    pub connection_string: String,
    /// Command timeout for ad-hoc statements (0 = no timeout)
    pub default_command_timeout_secs: u32,
    /// Row cap applied to reads when the caller gives none
    pub default_max_rows: usize,
    /// Command timeout for catalog queries
    pub metadata_timeout_secs: u32,
    /// Connect attempt timeout
    pub connect_timeout_secs: u32,
    /// Metadata cache TTL
    pub cache_ttl_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            default_command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            default_max_rows: DEFAULT_MAX_ROWS,
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("connection_string", &"<redacted>")
            .field("default_command_timeout_secs", &self.default_command_timeout_secs)
            .field("default_max_rows", &self.default_max_rows)
            .field("metadata_timeout_secs", &self.metadata_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .finish()
    }
}

impl DatabaseSettings {
    /// Create settings for a connection string with all other values defaulted.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self { connection_string: connection_string.into(), ..Self::default() }
    }

    /// Set the default command timeout.
    pub fn with_command_timeout_secs(mut self, secs: u32) -> Self {
        self.default_command_timeout_secs = secs;
        self
    }

    /// Set the default row cap.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.default_max_rows = max_rows;
        self
    }

    /// Set the catalog query timeout.
    pub fn with_metadata_timeout_secs(mut self, secs: u32) -> Self {
        self.metadata_timeout_secs = secs;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout_secs(mut self, secs: u32) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set the metadata cache TTL.
    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    /// Metadata cache TTL as a `Duration`.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs as u64)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(PgScopeError::config("A connection string is required"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(PgScopeError::config("Connect timeout must be at least 1 second"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(PgScopeError::config("Cache TTL must be at least 1 second"));
        }
        Ok(())
    }
}
