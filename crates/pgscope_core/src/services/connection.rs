//! Tracked database connections.
//!
//! Every operation opens its own connection through the [`ConnectionTracker`]
//! and holds it as a [`TrackedConnection`] guard:
//! - Registered in a shared registry while open
//! - Released exactly once, on drop or explicit `release`
//! - Force-closed by `close_all` at shutdown

use crate::error::{PgScopeError, Result};
use crate::models::{ActiveConnectionInfo, DatabaseInfo, Row, TrackerStatus};
use crate::services::values::row_values;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use native_tls::TlsConnector;
use parking_lot::{Mutex, RwLock};
use postgres_native_tls::MakeTlsConnector;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::config::{Host, SslMode};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, Config, NoTls, Socket};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Column names plus positional row values from one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl RowSet {
    /// Number of rows fetched.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were fetched.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Convert positional rows to name-keyed rows, keeping column order.
    pub fn into_rows(self) -> (Vec<String>, Vec<Row>) {
        let rows = self
            .rows
            .into_iter()
            .map(|values| self.columns.iter().cloned().zip(values).collect::<Row>())
            .collect();
        (self.columns, rows)
    }
}

/// Opens sessions against the target database.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session with the given statement timeout (0 = none).
    ///
    /// The session's underlying connection must end once `shutdown` is
    /// cancelled.
    async fn connect(
        &self,
        command_timeout_secs: u32,
        shutdown: CancellationToken,
    ) -> Result<Box<dyn Session>>;

    /// Static description of the target (server, database, user).
    fn describe(&self) -> DatabaseInfo;
}

/// One open database session.
#[async_trait]
pub trait Session: Send {
    /// Run a row-returning statement, fetching at most `limit` rows.
    ///
    /// A capped fetch stops reading early, so an error raised after the
    /// fetched rows is not reported.
    async fn query(&mut self, sql: &str, params: &[String], limit: Option<usize>)
        -> Result<RowSet>;

    /// Run a statement to completion and return the number of rows affected
    /// (rows returned, for a read).
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Start a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;
}

// ========== PostgreSQL ==========

/// Production connector backed by tokio-postgres.
pub struct PgConnector {
    config: Config,
    connect_timeout: Duration,
}

impl PgConnector {
    /// Parse a connection string (key/value or URL form).
    pub fn new(connection_string: &str, connect_timeout: Duration) -> Result<Self> {
        let mut config: Config = connection_string
            .parse()
            .map_err(|e| PgScopeError::config(format!("Invalid connection string: {e}")))?;

        if config.get_application_name().is_none() {
            config.application_name("pgscope");
        }
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(connect_timeout);
        }
        config.keepalives(true);

        Ok(Self { config, connect_timeout })
    }

    async fn open_client<T>(&self, tls: T, shutdown: CancellationToken) -> Result<Client>
    where
        T: MakeTlsConnect<Socket> + Send + Sync + 'static,
        T::Stream: Send + Sync + 'static,
        T::TlsConnect: Send + Sync,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (client, connection) =
            tokio::time::timeout(self.connect_timeout, self.config.connect(tls))
                .await
                .map_err(|_| {
                    PgScopeError::connection(format!(
                        "Connection attempt timed out after {}s",
                        self.connect_timeout.as_secs()
                    ))
                })?
                .map_err(|e| {
                    let message = format!("Failed to establish connection: {e}");
                    PgScopeError::connection_with_source(message, e)
                })?;

        tokio::spawn(async move {
            tokio::select! {
                result = connection => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "Connection task ended with error");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::trace!("Connection task closed on release");
                }
            }
        });

        Ok(client)
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(
        &self,
        command_timeout_secs: u32,
        shutdown: CancellationToken,
    ) -> Result<Box<dyn Session>> {
        let client = match self.config.get_ssl_mode() {
            SslMode::Disable => self.open_client(NoTls, shutdown).await?,
            _ => {
                let connector = TlsConnector::builder().build().map_err(|e| {
                    PgScopeError::connection_with_source("Failed to initialize TLS", e)
                })?;
                self.open_client(MakeTlsConnector::new(connector), shutdown).await?
            }
        };

        if command_timeout_secs > 0 {
            let ms = u64::from(command_timeout_secs) * 1000;
            client
                .batch_execute(&format!("SET statement_timeout = {ms}"))
                .await
                .map_err(|e| {
                    PgScopeError::connection_with_source("Failed to apply command timeout", e)
                })?;
        }

        Ok(Box::new(PgSession { client }))
    }

    fn describe(&self) -> DatabaseInfo {
        let server_name = self
            .config
            .get_hosts()
            .first()
            .map(|host| match host {
                Host::Tcp(name) => name.clone(),
                #[cfg(unix)]
                Host::Unix(path) => path.display().to_string(),
            })
            .unwrap_or_else(|| "localhost".to_string());
        let user_name = self.config.get_user().unwrap_or_default().to_string();
        let database_name = self
            .config
            .get_dbname()
            .map(String::from)
            .unwrap_or_else(|| user_name.clone());

        DatabaseInfo { server_name, database_name, user_name, ..DatabaseInfo::default() }
    }
}

/// A tokio-postgres client; the connection task ends with its tracker entry.
struct PgSession {
    client: Client,
}

#[async_trait]
impl Session for PgSession {
    async fn query(
        &mut self,
        sql: &str,
        params: &[String],
        limit: Option<usize>,
    ) -> Result<RowSet> {
        let statement = self.client.prepare(sql).await?;
        let columns = statement.columns().iter().map(|c| c.name().to_string()).collect();

        // Stream so a capped read never pulls the whole result set
        let stream = self.client.query_raw(&statement, params.iter()).await?;
        let mut stream = pin!(stream);

        let mut rows = Vec::new();
        while limit.map_or(true, |limit| rows.len() < limit) {
            match stream.next().await {
                Some(row) => rows.push(row_values(&row?)),
                None => break,
            }
        }

        Ok(RowSet { columns, rows })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn begin(&mut self) -> Result<()> {
        Ok(self.client.batch_execute("BEGIN").await?)
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(self.client.batch_execute("COMMIT").await?)
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }
}

// ========== Tracking ==========

struct RegistryEntry {
    info: ActiveConnectionInfo,
    shutdown: CancellationToken,
}

/// Shared registry of open connections.
#[derive(Default)]
struct ConnectionRegistry {
    active: Mutex<HashMap<Uuid, RegistryEntry>>,
    opened_total: AtomicU64,
    released_total: AtomicU64,
    shut_down: AtomicBool,
}

impl ConnectionRegistry {
    /// Register a connection. Fails once the registry has been shut down.
    fn insert(&self, id: Uuid, entry: RegistryEntry) -> bool {
        let mut active = self.active.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        active.insert(id, entry);
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove a connection and end its session. Returns false if it was
    /// already gone.
    fn remove(&self, id: Uuid) -> bool {
        let entry = self.active.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.shutdown.cancel();
                self.released_total.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.active.lock().len()
    }
}

/// Opens connections and keeps track of every one still open.
pub struct ConnectionTracker {
    connector: Arc<dyn Connector>,
    registry: Arc<ConnectionRegistry>,
    info: RwLock<DatabaseInfo>,
}

impl ConnectionTracker {
    /// Create a tracker over a connector.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let info = connector.describe();
        let registry = Arc::new(ConnectionRegistry::default());
        Self { connector, registry, info: RwLock::new(info) }
    }

    /// Open a tracked connection with the given command timeout.
    pub async fn open(&self, command_timeout_secs: u32) -> Result<TrackedConnection> {
        if self.registry.shut_down.load(Ordering::SeqCst) {
            return Err(PgScopeError::connection("Connection tracker has been shut down"));
        }

        let shutdown = CancellationToken::new();
        let session = match self.connector.connect(command_timeout_secs, shutdown.clone()).await {
            Ok(session) => session,
            Err(e) => {
                shutdown.cancel();
                self.info.write().is_connected = false;
                tracing::warn!(error = %e, "Failed to open connection");
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        let entry = RegistryEntry {
            info: ActiveConnectionInfo { id, opened_at: Utc::now(), command_timeout_secs },
            shutdown: shutdown.clone(),
        };
        if !self.registry.insert(id, entry) {
            shutdown.cancel();
            return Err(PgScopeError::connection("Connection tracker has been shut down"));
        }

        {
            let mut info = self.info.write();
            info.is_connected = true;
            info.last_connected = Some(Utc::now());
        }

        tracing::debug!(
            connection_id = %id,
            command_timeout_secs,
            active = self.registry.len(),
            "Opened tracked connection"
        );

        Ok(TrackedConnection {
            id,
            session,
            shutdown,
            registry: Arc::clone(&self.registry),
            released: false,
        })
    }

    /// Release a connection. Releasing twice is a no-op.
    pub fn release(&self, connection: &mut TrackedConnection) -> bool {
        connection.release()
    }

    /// Force-close every tracked connection and refuse new ones.
    ///
    /// Returns the number of connections that were still open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(Uuid, RegistryEntry)> = {
            let mut active = self.registry.active.lock();
            self.registry.shut_down.store(true, Ordering::SeqCst);
            active.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            entry.shutdown.cancel();
            self.registry.released_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection_id = %id, "Force-closed connection");
        }

        tracing::info!(closed = count, "Closed all tracked connections");
        count
    }

    /// Number of connections currently open.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of open connections.
    pub fn active_connections(&self) -> Vec<ActiveConnectionInfo> {
        let mut list: Vec<_> =
            self.registry.active.lock().values().map(|e| e.info.clone()).collect();
        list.sort_by_key(|info| info.opened_at);
        list
    }

    /// Tracker counters.
    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            active: self.registry.len(),
            opened_total: self.registry.opened_total.load(Ordering::Relaxed),
            released_total: self.registry.released_total.load(Ordering::Relaxed),
            is_shut_down: self.registry.shut_down.load(Ordering::SeqCst),
        }
    }

    /// Target description plus the outcome of the last connection attempt.
    pub fn database_info(&self) -> DatabaseInfo {
        self.info.read().clone()
    }

    /// Verify connectivity with `SELECT 1`.
    pub async fn test_connection(&self, command_timeout_secs: u32) -> Result<()> {
        let result = async {
            let mut conn = self.open(command_timeout_secs).await?;
            conn.query("SELECT 1", &[], Some(1)).await?;
            conn.release();
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            self.info.write().is_connected = false;
            tracing::warn!(error = %e, "Connection test failed");
        }
        result
    }
}

/// A connection held by one operation.
///
/// Deregistered and closed when released or dropped, on every exit path.
pub struct TrackedConnection {
    id: Uuid,
    session: Box<dyn Session>,
    shutdown: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    released: bool,
}

impl TrackedConnection {
    /// Registry identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the connection was released or force-closed.
    pub fn is_released(&self) -> bool {
        self.released || self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_released() {
            return Err(PgScopeError::connection("Connection is closed"));
        }
        Ok(())
    }

    /// Run a row-returning statement, fetching at most `limit` rows.
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[String],
        limit: Option<usize>,
    ) -> Result<RowSet> {
        self.ensure_open()?;
        self.session.query(sql, params, limit).await
    }

    /// Run a statement and return the number of rows affected.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        self.session.execute(sql).await
    }

    /// Start a transaction.
    pub async fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.session.begin().await
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.session.commit().await
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.session.rollback().await
    }

    /// Close and deregister. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.shutdown.cancel();
        let removed = self.registry.remove(self.id);
        if removed {
            tracing::debug!(connection_id = %self.id, "Released tracked connection");
        }
        removed
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDatabase;

    #[test]
    fn test_row_set_into_rows_keeps_column_order() {
        let set = RowSet {
            columns: vec!["z".to_string(), "a".to_string()],
            rows: vec![vec![JsonValue::from(1), JsonValue::from("x")]],
        };
        let (columns, rows) = set.into_rows();
        assert_eq!(columns, vec!["z", "a"]);
        let keys: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_pg_connector_describe_omits_password() {
        let connector = PgConnector::new(
            "host=db.internal dbname=shop user=reader password=hunter2",
            Duration::from_secs(5),
        )
        .unwrap();
        let info = connector.describe();
        assert_eq!(info.server_name, "db.internal");
        assert_eq!(info.database_name, "shop");
        assert_eq!(info.user_name, "reader");
        assert!(!serde_json::to_string(&info).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_pg_connector_rejects_garbage() {
        let err = PgConnector::new("host=db nonsense_option=1", Duration::from_secs(5))
            .err()
            .unwrap();
        assert_eq!(err.category(), "Config");
        assert!(err.to_string().starts_with("Config error: Invalid connection string"));
    }

    #[tokio::test]
    async fn test_open_and_release_updates_registry() {
        let db = FakeDatabase::new();
        let tracker = db.tracker();

        let mut conn = tracker.open(30).await.unwrap();
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.active_connections()[0].command_timeout_secs, 30);

        assert!(tracker.release(&mut conn));
        assert!(!tracker.release(&mut conn));
        drop(conn);

        let status = tracker.status();
        assert_eq!(status.active, 0);
        assert_eq!(status.opened_total, 1);
        assert_eq!(status.released_total, 1);
        assert!(status.is_balanced());
    }

    #[tokio::test]
    async fn test_drop_releases_on_error_path() {
        let db = FakeDatabase::new();
        db.fail_statements_containing("INSERT");
        let tracker = db.tracker();

        let result: Result<()> = async {
            let mut conn = tracker.open(5).await?;
            conn.execute("INSERT INTO users (id) VALUES (1)").await?;
            Ok(())
        }
        .await;

        assert!(result.is_err());
        assert!(tracker.status().is_balanced());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_registered() {
        let db = FakeDatabase::new();
        db.fail_connects("password authentication failed");
        let tracker = db.tracker();

        let err = tracker.open(5).await.err().unwrap();
        assert_eq!(err.category(), "Connection");
        assert_eq!(tracker.status().opened_total, 0);
        assert!(!tracker.database_info().is_connected);
    }

    #[tokio::test]
    async fn test_close_all_force_closes_and_blocks_new_opens() {
        let db = FakeDatabase::new();
        let tracker = db.tracker();

        let mut first = tracker.open(5).await.unwrap();
        let _second = tracker.open(5).await.unwrap();
        assert_eq!(tracker.close_all(), 2);
        assert_eq!(tracker.active_count(), 0);

        // The holder sees a closed connection and its release is a no-op
        assert!(first.is_released());
        assert!(first.execute("UPDATE t SET x = 1").await.is_err());
        assert!(!first.release());

        let status = tracker.status();
        assert_eq!(status.released_total, 2);
        assert!(status.is_shut_down);
        assert!(tracker.open(5).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_updates_database_info() {
        let db = FakeDatabase::new();
        let tracker = db.tracker();
        assert!(tracker.database_info().last_connected.is_none());

        tracker.test_connection(5).await.unwrap();
        let info = tracker.database_info();
        assert!(info.is_connected);
        assert!(info.last_connected.is_some());
        assert_eq!(info.database_name, "testdb");
        assert!(tracker.status().is_balanced());
    }
}
