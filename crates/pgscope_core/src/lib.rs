//! Core of the pgscope PostgreSQL server.
//!
//! This crate provides everything behind the request transport:
//!
//! - **error**: Error taxonomy with PostgreSQL-specific details
//! - **config**: Settings supplied by the outer layer
//! - **models**: Query results, catalog records, resource addresses
//! - **services**: Connection tracking, statement validation, query execution,
//!   metadata caching, resource resolution
//! - **tools**: Text-returning tool operations
//! - **dispatch**: Line-delimited JSON request routing
//! - **state**: Server state wiring
//! - **logging**: Structured logging setup

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::DatabaseSettings;
pub use dispatch::{Dispatcher, ToolCall};
pub use error::{PgScopeError, Result};
pub use models::{
    ColumnDescriptor, ColumnInfo, DatabaseInfo, ObjectCategory, ProcedureInfo, QueryResult,
    ResourceAddress, ResourceContents, ResourceDescriptor, SchemaInfo, TableInfo, ViewInfo,
};
pub use services::{
    ConnectionTracker, MetadataCache, QueryExecutor, QueryOptions, ResourceResolver,
    StatementValidator,
};
pub use state::PgScopeState;
pub use tools::DatabaseTools;
