//! Server state.
//!
//! One explicitly owned instance wires the tracker, cache, executor, resolver
//! and tools together. Nothing here is a process-wide singleton.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseSettings;
use crate::error::Result;
use crate::services::{
    ConnectionTracker, Connector, MetadataCache, PgConnector, QueryExecutor, ResourceResolver,
};
use crate::tools::DatabaseTools;

/// Shortest interval between cache sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Central server state.
pub struct PgScopeState {
    settings: DatabaseSettings,
    tracker: Arc<ConnectionTracker>,
    cache: Arc<MetadataCache>,
    executor: Arc<QueryExecutor>,
    resolver: Arc<ResourceResolver>,
    tools: DatabaseTools,
    shutdown: CancellationToken,
}

impl PgScopeState {
    /// Build state for a PostgreSQL server described by `settings`.
    ///
    /// Does not connect; use [`Self::verify_connection`] for that.
    pub fn new(settings: DatabaseSettings) -> Result<Self> {
        settings.validate()?;
        let connector =
            PgConnector::new(&settings.connection_string, settings.connect_timeout())?;
        Self::with_connector(settings, Arc::new(connector))
    }

    /// Build state over any connector.
    pub fn with_connector(
        settings: DatabaseSettings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let tracker = Arc::new(ConnectionTracker::new(connector));
        let cache = Arc::new(MetadataCache::new(settings.cache_ttl()));
        let executor = Arc::new(QueryExecutor::new(Arc::clone(&tracker), &settings));
        let resolver =
            Arc::new(ResourceResolver::new(Arc::clone(&tracker), Arc::clone(&cache), &settings));
        let tools = DatabaseTools::new(
            Arc::clone(&executor),
            Arc::clone(&resolver),
            Arc::clone(&tracker),
            &settings,
        );

        tracing::info!(
            command_timeout_secs = settings.default_command_timeout_secs,
            max_rows = settings.default_max_rows,
            cache_ttl_secs = settings.cache_ttl_secs,
            "PgScopeState initialized"
        );

        Ok(Self {
            settings,
            tracker,
            cache,
            executor,
            resolver,
            tools,
            shutdown: CancellationToken::new(),
        })
    }

    /// Open and release one connection, failing if the database is unreachable.
    pub async fn verify_connection(&self) -> Result<()> {
        self.tracker.test_connection(self.settings.default_command_timeout_secs).await?;
        let info = self.tracker.database_info();
        tracing::info!(
            server = %info.server_name,
            database = %info.database_name,
            "Database connection verified"
        );
        Ok(())
    }

    /// Start the background cache sweeper. It stops on [`Self::shutdown`].
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        let interval = (self.settings.cache_ttl() / 2).max(MIN_SWEEP_INTERVAL);
        tracing::debug!(interval_secs = interval.as_secs(), "Starting metadata cache sweeper");
        self.cache.spawn_sweeper(interval, self.shutdown.clone())
    }

    // ========== Accessors ==========

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    pub fn resolver(&self) -> &Arc<ResourceResolver> {
        &self.resolver
    }

    pub fn tools(&self) -> &DatabaseTools {
        &self.tools
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    // ========== Shutdown ==========

    /// Stop background work, drop cached metadata and force-close every open
    /// connection. Returns the number of connections that were closed.
    pub fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        self.cache.clear();
        let closed = self.tracker.close_all();
        tracing::info!(closed, "PgScopeState shut down");
        closed
    }
}
