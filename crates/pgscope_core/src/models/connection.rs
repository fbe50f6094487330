//! Connection status models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the server knows about its target database.
///
/// Deliberately has no connection-string or password field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    /// Host (or socket directory) of the server
    pub server_name: String,
    /// Database name
    pub database_name: String,
    /// Login role
    pub user_name: String,
    /// Whether the last connectivity test succeeded
    pub is_connected: bool,
    /// When a connection last succeeded
    pub last_connected: Option<DateTime<Utc>>,
}

/// A connection currently held by some operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveConnectionInfo {
    /// Registry identifier
    pub id: Uuid,
    /// When the connection was opened
    pub opened_at: DateTime<Utc>,
    /// Statement timeout applied to the session, in seconds
    pub command_timeout_secs: u32,
}

/// Connection tracker counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    /// Connections currently open
    pub active: usize,
    /// Connections opened since start
    pub opened_total: u64,
    /// Connections released since start
    pub released_total: u64,
    /// Whether `close_all` has run
    pub is_shut_down: bool,
}

impl TrackerStatus {
    /// Every opened connection has been released.
    pub fn is_balanced(&self) -> bool {
        self.active == 0 && self.opened_total == self.released_total
    }
}
