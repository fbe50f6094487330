//! Resource resolution.
//!
//! Maps `pgscope://schemas/...` addresses to catalog lookups. Every lookup
//! goes through the [`MetadataCache`] under a key that encodes the object
//! kind, schema and name, so repeated browsing does not re-query the catalog.

use std::sync::Arc;

use serde::Serialize;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseSettings;
use crate::error::{PgScopeError, Result};
use crate::models::{
    ColumnInfo, ObjectCategory, ProcedureInfo, ResourceAddress, ResourceContents,
    ResourceDescriptor, SchemaInfo, TableInfo, ViewInfo, JSON_MIME_TYPE,
};
use crate::services::cache::{cache_key, MetadataCache};
use crate::services::connection::ConnectionTracker;
use crate::services::schema::SchemaService;

/// MIME type of error payloads.
const TEXT_MIME_TYPE: &str = "text/plain";

/// Resolves resource addresses to cached catalog metadata.
pub struct ResourceResolver {
    tracker: Arc<ConnectionTracker>,
    cache: Arc<MetadataCache>,
    metadata_timeout_secs: u32,
}

impl ResourceResolver {
    pub fn new(
        tracker: Arc<ConnectionTracker>,
        cache: Arc<MetadataCache>,
        settings: &DatabaseSettings,
    ) -> Self {
        Self { tracker, cache, metadata_timeout_secs: settings.metadata_timeout_secs }
    }

    /// The cache this resolver reads through.
    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    // ========== Listing ==========

    /// One address per schema plus its three collections.
    ///
    /// Object names are not enumerated here. A failure to load the schema
    /// list is logged and yields an empty listing.
    pub async fn list_addresses(&self, cancel: &CancellationToken) -> Vec<ResourceAddress> {
        let schemas = select! {
            result = self.schemas() => result,
            _ = cancel.cancelled() => Err(PgScopeError::Cancelled),
        };

        match schemas {
            Ok(schemas) => schemas
                .into_iter()
                .flat_map(|schema| {
                    let collections = ObjectCategory::ALL.into_iter().map({
                        let schema = schema.clone();
                        move |category| ResourceAddress::Collection {
                            schema: schema.clone(),
                            category,
                        }
                    });
                    std::iter::once(ResourceAddress::Schema { schema }).chain(collections)
                })
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to list schema resources");
                Vec::new()
            }
        }
    }

    /// Listing descriptors for every address from [`Self::list_addresses`].
    pub async fn list_resources(&self, cancel: &CancellationToken) -> Vec<ResourceDescriptor> {
        tracing::info!("Resource listing requested");
        self.list_addresses(cancel).await.iter().map(ResourceDescriptor::for_address).collect()
    }

    // ========== Reading ==========

    /// Resolve an address to its JSON document.
    pub async fn read(&self, uri: &str) -> Result<String> {
        let address = ResourceAddress::parse(uri)?;
        let schema = address.schema();

        if !self.schemas().await?.iter().any(|s| s == schema) {
            return Err(PgScopeError::unknown_resource_with_reason(
                uri,
                format!("schema '{schema}' not found"),
            ));
        }

        match &address {
            ResourceAddress::Schema { schema } => to_json(&self.schema_info(schema).await?),
            ResourceAddress::Collection { schema, category } => {
                to_json(&self.names(*category, schema).await?)
            }
            ResourceAddress::Object { schema, category, name } => {
                if !self.names(*category, schema).await?.contains(name) {
                    return Err(PgScopeError::unknown_resource_with_reason(
                        uri,
                        format!("{} '{schema}.{name}' not found", category.singular()),
                    ));
                }
                match category {
                    ObjectCategory::Tables => to_json(&self.table(schema, name).await?),
                    ObjectCategory::Views => to_json(&self.view(schema, name).await?),
                    ObjectCategory::Procedures => to_json(&self.procedure(schema, name).await?),
                }
            }
        }
    }

    /// Read an address for the transport. Errors become a `text/plain`
    /// payload instead of failing the call.
    pub async fn read_resource(&self, uri: &str, cancel: &CancellationToken) -> ResourceContents {
        tracing::info!(uri, "Resource read requested");

        let outcome = select! {
            result = self.read(uri) => result,
            _ = cancel.cancelled() => Err(PgScopeError::Cancelled),
        };

        match outcome {
            Ok(text) => ResourceContents {
                uri: uri.to_string(),
                mime_type: JSON_MIME_TYPE.to_string(),
                text,
            },
            Err(e) => {
                tracing::error!(uri, error = %e, "Error retrieving resource");
                ResourceContents {
                    uri: uri.to_string(),
                    mime_type: TEXT_MIME_TYPE.to_string(),
                    text: format!("Error retrieving resource: {e}"),
                }
            }
        }
    }

    // ========== Cached catalog lookups ==========

    /// User schemas.
    pub async fn schemas(&self) -> Result<Vec<String>> {
        let key = cache_key(&["schemas"]);
        self.cache
            .get_or_compute(&key, move || async move {
                let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;
                let schemas = SchemaService::load_schemas(&mut conn).await?;
                conn.release();
                Ok(schemas)
            })
            .await
    }

    /// Object names of one category in a schema.
    pub async fn names(&self, category: ObjectCategory, schema: &str) -> Result<Vec<String>> {
        let key = cache_key(&[category.as_str(), schema]);
        self.cache
            .get_or_compute(&key, move || async move {
                let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;
                let names = SchemaService::load_names(&mut conn, category, Some(schema)).await?;
                conn.release();
                Ok(names)
            })
            .await
    }

    /// Object names of one category across all user schemas.
    pub async fn all_names(&self, category: ObjectCategory) -> Result<Vec<String>> {
        let key = cache_key(&["all", category.as_str()]);
        self.cache
            .get_or_compute(&key, move || async move {
                let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;
                let names = SchemaService::load_names(&mut conn, category, None).await?;
                conn.release();
                Ok(names)
            })
            .await
    }

    /// Object counts for a schema, built from the three cached lists.
    pub async fn schema_info(&self, schema: &str) -> Result<SchemaInfo> {
        let key = cache_key(&["schema", schema]);
        self.cache
            .get_or_compute(&key, move || async move {
                Ok(SchemaInfo {
                    name: schema.to_string(),
                    table_count: self.names(ObjectCategory::Tables, schema).await?.len(),
                    view_count: self.names(ObjectCategory::Views, schema).await?.len(),
                    procedure_count: self.names(ObjectCategory::Procedures, schema).await?.len(),
                })
            })
            .await
    }

    /// One table with keys.
    pub async fn table(&self, schema: &str, name: &str) -> Result<TableInfo> {
        let key = cache_key(&[ObjectCategory::Tables.singular(), schema, name]);
        self.cache
            .get_or_compute(&key, move || async move {
                let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;
                let table = SchemaService::load_table(&mut conn, schema, name).await?;
                conn.release();
                Ok(table)
            })
            .await
    }

    /// One view with its definition.
    pub async fn view(&self, schema: &str, name: &str) -> Result<ViewInfo> {
        let key = cache_key(&[ObjectCategory::Views.singular(), schema, name]);
        self.cache
            .get_or_compute(&key, move || async move {
                let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;
                let view = SchemaService::load_view(&mut conn, schema, name).await?;
                conn.release();
                Ok(view)
            })
            .await
    }

    /// One procedure with its parameters.
    pub async fn procedure(&self, schema: &str, name: &str) -> Result<ProcedureInfo> {
        let key = cache_key(&[ObjectCategory::Procedures.singular(), schema, name]);
        self.cache
            .get_or_compute(&key, move || async move {
                let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;
                let procedure = SchemaService::load_procedure(&mut conn, schema, name).await?;
                conn.release();
                Ok(procedure)
            })
            .await
    }

    /// Columns of a table or view given as `schema.table` or a bare name.
    ///
    /// A bare name resolves to `public` when it exists there, otherwise to
    /// the first schema (by name) that has it. Not cached.
    pub async fn table_columns(&self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        let mut conn = self.tracker.open(self.metadata_timeout_secs).await?;

        let (schema, table) = match table_name.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => {
                let schemas = SchemaService::find_table_schemas(&mut conn, table_name).await?;
                let schema = schemas
                    .iter()
                    .find(|s| s.as_str() == "public")
                    .or_else(|| schemas.first())
                    .cloned();
                match schema {
                    Some(schema) => (schema, table_name.to_string()),
                    None => return Ok(Vec::new()),
                }
            }
        };

        let columns = SchemaService::load_columns(&mut conn, &schema, &table).await?;
        conn.release();
        Ok(columns)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
