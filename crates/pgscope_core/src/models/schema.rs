//! Catalog models.
//!
//! Read-only snapshots of PostgreSQL objects taken when a request (or cache
//! fill) ran. They are not kept in sync with later schema changes.

use serde::{Deserialize, Serialize};

/// Object counts for one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    /// Schema name (e.g., "public").
    pub name: String,
    /// Number of base tables.
    pub table_count: usize,
    /// Number of views.
    pub view_count: usize,
    /// Number of stored procedures.
    pub procedure_count: usize,
}

/// A table with its columns and keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Schema name containing this table.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnInfo>,
    /// Primary key columns in key order.
    pub primary_keys: Vec<String>,
    /// Outgoing foreign key column pairs.
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

/// A view with its columns and definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    /// Schema name containing this view.
    pub schema: String,
    /// View name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnInfo>,
    /// The view's SELECT text (empty if not visible to the current role).
    pub definition: String,
}

/// A stored procedure with its parameters and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureInfo {
    /// Schema name containing this procedure.
    pub schema: String,
    /// Procedure name.
    pub name: String,
    /// Parameters in ordinal order.
    pub parameters: Vec<ParameterInfo>,
    /// Procedure body (empty if not visible to the current role).
    pub definition: String,
}

/// A table or view column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Data type (e.g., "integer", "character varying").
    pub data_type: String,
    /// Character length limit, if the type has one.
    pub max_length: Option<i32>,
    /// Whether the column allows NULL values.
    pub is_nullable: bool,
    /// Default value expression, if any.
    pub default_value: Option<String>,
}

/// One column pair of a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyInfo {
    /// Constraint name.
    pub name: String,
    /// Referencing column.
    pub column_name: String,
    /// Schema of the referenced table.
    pub referenced_schema: String,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced column.
    pub referenced_column: String,
}

/// A procedure parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInfo {
    /// Parameter name (unnamed parameters have none).
    pub name: Option<String>,
    /// IN, OUT or INOUT.
    pub mode: String,
    /// Data type.
    pub data_type: String,
    /// Character length limit, if the type has one.
    pub max_length: Option<i32>,
    /// Default expression, if any.
    pub default_value: Option<String>,
}

/// Flat, string-valued column description returned by `getTableSchema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub max_length: String,
    pub is_nullable: String,
    pub default_value: String,
}

impl From<&ColumnInfo> for ColumnDescriptor {
    fn from(column: &ColumnInfo) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
            max_length: column
                .max_length
                .map(|len| len.to_string())
                .unwrap_or_else(|| "null".to_string()),
            is_nullable: if column.is_nullable { "YES" } else { "NO" }.to_string(),
            default_value: column.default_value.clone().unwrap_or_else(|| "null".to_string()),
        }
    }
}
