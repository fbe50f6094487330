//! Backend services for pgscope.
//!
//! - `connection` - Connector/session seam and the connection tracker
//! - `validation` - Rule-based statement validation
//! - `query` - Validated, capped, cancellable query execution
//! - `cache` - TTL metadata cache
//! - `schema` - Catalog introspection queries
//! - `resource` - Resource address resolution through the cache
//! - `values` - PostgreSQL row to JSON conversion

pub mod cache;
pub mod connection;
pub mod query;
pub mod resource;
pub mod schema;
pub mod validation;
pub mod values;

pub use cache::{cache_key, CacheStats, Clock, ManualClock, MetadataCache, SystemClock};
pub use connection::{
    ConnectionTracker, Connector, PgConnector, RowSet, Session, TrackedConnection,
};
pub use query::{QueryExecutor, QueryOptions};
pub use resource::ResourceResolver;
pub use schema::SchemaService;
pub use validation::{Rule, StatementValidator, RULES};
