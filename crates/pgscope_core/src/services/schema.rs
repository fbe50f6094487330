//! Schema introspection service.
//!
//! Queries `information_schema` (and `pg_catalog` for foreign keys) to build
//! the catalog records served by tools and resources. Identifier-typed
//! columns are cast to `text` so they decode as plain strings.

use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::{
    ColumnInfo, ForeignKeyInfo, ObjectCategory, ParameterInfo, ProcedureInfo, TableInfo, ViewInfo,
};
use crate::services::connection::{RowSet, TrackedConnection};

pub(crate) const SCHEMAS_SQL: &str = r#"
    SELECT schema_name::text AS name
    FROM information_schema.schemata
    WHERE schema_name NOT LIKE 'pg_%'
      AND schema_name != 'information_schema'
    ORDER BY schema_name
"#;

pub(crate) const TABLES_IN_SCHEMA_SQL: &str = r#"
    SELECT table_name::text AS name
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema::text = $1
    ORDER BY table_name
"#;

pub(crate) const VIEWS_IN_SCHEMA_SQL: &str = r#"
    SELECT table_name::text AS name
    FROM information_schema.views
    WHERE table_schema::text = $1
    ORDER BY table_name
"#;

pub(crate) const PROCEDURES_IN_SCHEMA_SQL: &str = r#"
    SELECT DISTINCT routine_name::text AS name
    FROM information_schema.routines
    WHERE routine_type = 'PROCEDURE'
      AND routine_schema::text = $1
    ORDER BY name
"#;

pub(crate) const ALL_TABLES_SQL: &str = r#"
    SELECT table_name::text AS name
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema NOT LIKE 'pg_%'
      AND table_schema != 'information_schema'
    ORDER BY table_name
"#;

pub(crate) const ALL_VIEWS_SQL: &str = r#"
    SELECT table_name::text AS name
    FROM information_schema.views
    WHERE table_schema NOT LIKE 'pg_%'
      AND table_schema != 'information_schema'
    ORDER BY table_name
"#;

pub(crate) const ALL_PROCEDURES_SQL: &str = r#"
    SELECT DISTINCT routine_name::text AS name
    FROM information_schema.routines
    WHERE routine_type = 'PROCEDURE'
      AND routine_schema NOT LIKE 'pg_%'
      AND routine_schema != 'information_schema'
    ORDER BY name
"#;

pub(crate) const TABLE_SCHEMAS_SQL: &str = r#"
    SELECT table_schema::text AS name
    FROM information_schema.tables
    WHERE table_name::text = $1
      AND table_schema NOT LIKE 'pg_%'
      AND table_schema != 'information_schema'
    ORDER BY table_schema
"#;

pub(crate) const COLUMNS_SQL: &str = r#"
    SELECT
        column_name::text AS name,
        data_type::text AS data_type,
        character_maximum_length::int AS max_length,
        is_nullable::text AS is_nullable,
        column_default::text AS default_value
    FROM information_schema.columns
    WHERE table_schema::text = $1
      AND table_name::text = $2
    ORDER BY ordinal_position
"#;

pub(crate) const PRIMARY_KEYS_SQL: &str = r#"
    SELECT kcu.column_name::text AS name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_schema = tc.constraint_schema
     AND kcu.constraint_name = tc.constraint_name
     AND kcu.table_name = tc.table_name
    WHERE tc.constraint_type = 'PRIMARY KEY'
      AND tc.table_schema::text = $1
      AND tc.table_name::text = $2
    ORDER BY kcu.ordinal_position
"#;

pub(crate) const FOREIGN_KEYS_SQL: &str = r#"
    SELECT
        c.conname::text AS name,
        a.attname::text AS column_name,
        rn.nspname::text AS referenced_schema,
        rc.relname::text AS referenced_table,
        ra.attname::text AS referenced_column
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class cl ON cl.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = cl.relnamespace
    JOIN pg_catalog.pg_class rc ON rc.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rc.relnamespace
    CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.refnum
    WHERE c.contype = 'f'
      AND n.nspname::text = $1
      AND cl.relname::text = $2
    ORDER BY c.conname, k.ord
"#;

pub(crate) const VIEW_DEFINITION_SQL: &str = r#"
    SELECT view_definition::text AS definition
    FROM information_schema.views
    WHERE table_schema::text = $1
      AND table_name::text = $2
"#;

pub(crate) const PROCEDURE_PARAMETERS_SQL: &str = r#"
    SELECT
        p.parameter_name::text AS name,
        p.parameter_mode::text AS mode,
        p.data_type::text AS data_type,
        p.character_maximum_length::int AS max_length,
        p.parameter_default::text AS default_value
    FROM information_schema.parameters p
    JOIN information_schema.routines r
      ON r.specific_schema = p.specific_schema
     AND r.specific_name = p.specific_name
    WHERE r.routine_type = 'PROCEDURE'
      AND r.routine_schema::text = $1
      AND r.routine_name::text = $2
    ORDER BY p.specific_name, p.ordinal_position
"#;

pub(crate) const PROCEDURE_DEFINITION_SQL: &str = r#"
    SELECT routine_definition::text AS definition
    FROM information_schema.routines
    WHERE routine_type = 'PROCEDURE'
      AND routine_schema::text = $1
      AND routine_name::text = $2
    ORDER BY specific_name
    LIMIT 1
"#;

/// Schema introspection service.
pub struct SchemaService;

impl SchemaService {
    /// Load all user schemas (system schemas excluded).
    pub async fn load_schemas(conn: &mut TrackedConnection) -> Result<Vec<String>> {
        let set = conn.query(SCHEMAS_SQL, &[], None).await?;
        Ok(names(&set))
    }

    /// Load object names of one category, in one schema or across all user
    /// schemas.
    pub async fn load_names(
        conn: &mut TrackedConnection,
        category: ObjectCategory,
        schema: Option<&str>,
    ) -> Result<Vec<String>> {
        let set = match schema {
            Some(schema) => {
                let sql = match category {
                    ObjectCategory::Tables => TABLES_IN_SCHEMA_SQL,
                    ObjectCategory::Views => VIEWS_IN_SCHEMA_SQL,
                    ObjectCategory::Procedures => PROCEDURES_IN_SCHEMA_SQL,
                };
                conn.query(sql, &[schema.to_string()], None).await?
            }
            None => {
                let sql = match category {
                    ObjectCategory::Tables => ALL_TABLES_SQL,
                    ObjectCategory::Views => ALL_VIEWS_SQL,
                    ObjectCategory::Procedures => ALL_PROCEDURES_SQL,
                };
                conn.query(sql, &[], None).await?
            }
        };
        Ok(names(&set))
    }

    /// Schemas containing a table or view with this name.
    pub async fn find_table_schemas(
        conn: &mut TrackedConnection,
        table: &str,
    ) -> Result<Vec<String>> {
        let set = conn.query(TABLE_SCHEMAS_SQL, &[table.to_string()], None).await?;
        Ok(names(&set))
    }

    /// Load columns for a table or view, in ordinal order.
    pub async fn load_columns(
        conn: &mut TrackedConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let set = conn.query(COLUMNS_SQL, &pair(schema, table), None).await?;

        Ok(set
            .rows
            .iter()
            .map(|row| ColumnInfo {
                name: text(row, 0).unwrap_or_default(),
                data_type: text(row, 1).unwrap_or_default(),
                max_length: int(row, 2),
                is_nullable: text(row, 3).is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                default_value: text(row, 4),
            })
            .collect())
    }

    /// Load a table with columns, primary key and foreign keys.
    pub async fn load_table(
        conn: &mut TrackedConnection,
        schema: &str,
        name: &str,
    ) -> Result<TableInfo> {
        let columns = Self::load_columns(conn, schema, name).await?;

        let pk = conn.query(PRIMARY_KEYS_SQL, &pair(schema, name), None).await?;
        let primary_keys = names(&pk);

        let fk = conn.query(FOREIGN_KEYS_SQL, &pair(schema, name), None).await?;
        let foreign_keys = fk
            .rows
            .iter()
            .map(|row| ForeignKeyInfo {
                name: text(row, 0).unwrap_or_default(),
                column_name: text(row, 1).unwrap_or_default(),
                referenced_schema: text(row, 2).unwrap_or_default(),
                referenced_table: text(row, 3).unwrap_or_default(),
                referenced_column: text(row, 4).unwrap_or_default(),
            })
            .collect();

        Ok(TableInfo {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            primary_keys,
            foreign_keys,
        })
    }

    /// Load a view with columns and definition.
    pub async fn load_view(
        conn: &mut TrackedConnection,
        schema: &str,
        name: &str,
    ) -> Result<ViewInfo> {
        let columns = Self::load_columns(conn, schema, name).await?;
        let set = conn.query(VIEW_DEFINITION_SQL, &pair(schema, name), Some(1)).await?;

        Ok(ViewInfo {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            definition: first_text(&set).unwrap_or_default(),
        })
    }

    /// Load a procedure with parameters and definition.
    pub async fn load_procedure(
        conn: &mut TrackedConnection,
        schema: &str,
        name: &str,
    ) -> Result<ProcedureInfo> {
        let set = conn.query(PROCEDURE_PARAMETERS_SQL, &pair(schema, name), None).await?;
        let parameters = set
            .rows
            .iter()
            .map(|row| ParameterInfo {
                name: text(row, 0).filter(|n| !n.is_empty()),
                mode: text(row, 1).unwrap_or_else(|| "IN".to_string()),
                data_type: text(row, 2).unwrap_or_default(),
                max_length: int(row, 3),
                default_value: text(row, 4),
            })
            .collect();

        let set = conn.query(PROCEDURE_DEFINITION_SQL, &pair(schema, name), Some(1)).await?;

        Ok(ProcedureInfo {
            schema: schema.to_string(),
            name: name.to_string(),
            parameters,
            definition: first_text(&set).unwrap_or_default(),
        })
    }
}

fn pair(schema: &str, name: &str) -> [String; 2] {
    [schema.to_string(), name.to_string()]
}

fn text(row: &[JsonValue], i: usize) -> Option<String> {
    row.get(i).and_then(JsonValue::as_str).map(String::from)
}

fn int(row: &[JsonValue], i: usize) -> Option<i32> {
    row.get(i).and_then(JsonValue::as_i64).and_then(|v| i32::try_from(v).ok())
}

fn names(set: &RowSet) -> Vec<String> {
    set.rows.iter().filter_map(|row| text(row, 0)).collect()
}

fn first_text(set: &RowSet) -> Option<String> {
    set.rows.first().and_then(|row| text(row, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_catalog, FakeDatabase};

    #[test]
    fn test_procedure_category_excludes_functions() {
        for sql in [
            PROCEDURES_IN_SCHEMA_SQL,
            ALL_PROCEDURES_SQL,
            PROCEDURE_PARAMETERS_SQL,
            PROCEDURE_DEFINITION_SQL,
        ] {
            assert!(sql.contains("routine_type = 'PROCEDURE'"), "{sql}");
            assert!(!sql.contains("'FUNCTION'"), "{sql}");
        }
    }

    #[tokio::test]
    async fn test_load_names_per_schema_and_across_schemas() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        let tracker = db.tracker();
        let mut conn = tracker.open(60).await.unwrap();

        let schemas = SchemaService::load_schemas(&mut conn).await.unwrap();
        assert_eq!(schemas, vec!["public", "sales"]);

        let tables =
            SchemaService::load_names(&mut conn, ObjectCategory::Tables, Some("public"))
                .await
                .unwrap();
        assert_eq!(tables, vec!["orders", "users"]);

        let all = SchemaService::load_names(&mut conn, ObjectCategory::Tables, None)
            .await
            .unwrap();
        assert_eq!(all, vec!["invoices", "orders", "users"]);

        let procs =
            SchemaService::load_names(&mut conn, ObjectCategory::Procedures, Some("sales"))
                .await
                .unwrap();
        assert_eq!(procs, vec!["close_month"]);
    }

    #[tokio::test]
    async fn test_load_table_assembles_keys() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        let tracker = db.tracker();
        let mut conn = tracker.open(60).await.unwrap();

        let table = SchemaService::load_table(&mut conn, "public", "orders").await.unwrap();
        assert_eq!(table.name, "orders");
        assert_eq!(table.primary_keys, vec!["id"]);
        assert_eq!(table.columns.len(), 3);
        assert!(!table.columns[0].is_nullable);
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].referenced_table, "users");
    }

    #[tokio::test]
    async fn test_load_view_and_procedure() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        let tracker = db.tracker();
        let mut conn = tracker.open(60).await.unwrap();

        let view = SchemaService::load_view(&mut conn, "public", "active_users").await.unwrap();
        assert_eq!(view.definition, "SELECT id, email FROM users WHERE active");
        assert_eq!(view.columns.len(), 2);

        let procedure =
            SchemaService::load_procedure(&mut conn, "sales", "close_month").await.unwrap();
        assert_eq!(procedure.parameters.len(), 1);
        assert_eq!(procedure.parameters[0].name.as_deref(), Some("p_month"));
        assert_eq!(procedure.parameters[0].mode, "IN");
        assert!(procedure.definition.contains("UPDATE invoices"));
    }

    #[tokio::test]
    async fn test_find_table_schemas() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        let tracker = db.tracker();
        let mut conn = tracker.open(60).await.unwrap();

        let schemas = SchemaService::find_table_schemas(&mut conn, "invoices").await.unwrap();
        assert_eq!(schemas, vec!["sales"]);
        let none = SchemaService::find_table_schemas(&mut conn, "missing").await.unwrap();
        assert!(none.is_empty());
    }
}
