//! Data models for pgscope.
//!
//! - `connection` - DatabaseInfo, tracker diagnostics
//! - `query` - QueryResult, ValidationVerdict, StatementKind
//! - `resource` - ResourceAddress, ObjectCategory, listing/read payloads
//! - `schema` - Catalog records (schemas, tables, views, procedures)

pub mod connection;
pub mod query;
pub mod resource;
pub mod schema;

pub use connection::{ActiveConnectionInfo, DatabaseInfo, TrackerStatus};
pub use query::{QueryResult, Row, StatementKind, ValidationVerdict};
pub use resource::{
    ObjectCategory, ResourceAddress, ResourceContents, ResourceDescriptor, JSON_MIME_TYPE,
    RESOURCE_SCHEME,
};
pub use schema::{
    ColumnDescriptor, ColumnInfo, ForeignKeyInfo, ParameterInfo, ProcedureInfo, SchemaInfo,
    TableInfo, ViewInfo,
};
