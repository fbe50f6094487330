//! Tool operations.
//!
//! Each tool returns text for the caller: pretty JSON on success, a plain
//! message otherwise. Tools never fail; every error is rendered into the
//! returned string.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseSettings;
use crate::error::{PgScopeError, Result};
use crate::models::{ColumnDescriptor, ObjectCategory, QueryResult};
use crate::services::{ConnectionTracker, QueryExecutor, QueryOptions, ResourceResolver};

/// The tool surface exposed to the request dispatcher.
pub struct DatabaseTools {
    executor: Arc<QueryExecutor>,
    resolver: Arc<ResourceResolver>,
    tracker: Arc<ConnectionTracker>,
    metadata_timeout_secs: u32,
}

impl DatabaseTools {
    pub fn new(
        executor: Arc<QueryExecutor>,
        resolver: Arc<ResourceResolver>,
        tracker: Arc<ConnectionTracker>,
        settings: &DatabaseSettings,
    ) -> Self {
        Self { executor, resolver, tracker, metadata_timeout_secs: settings.metadata_timeout_secs }
    }

    // ========== Query tools ==========

    /// Run one statement. Rows come back as the serialized result, anything
    /// else as the result message.
    pub async fn execute_query(
        &self,
        query: &str,
        command_timeout: Option<u32>,
        max_rows: Option<usize>,
        cancel: &CancellationToken,
    ) -> String {
        let options = QueryOptions::new(command_timeout, max_rows);
        let result = self.executor.run(query, options, cancel).await;

        if !result.is_success {
            return with_error_code(format!("Error executing query: {}", result.message), &result);
        }
        if result.is_empty() {
            return result.message;
        }
        match serde_json::to_string_pretty(&result) {
            Ok(json) => json,
            Err(e) => format!("Error executing query: {e}"),
        }
    }

    /// Run one statement and return the first column of the first row.
    pub async fn execute_scalar_query(
        &self,
        query: &str,
        command_timeout: Option<u32>,
        cancel: &CancellationToken,
    ) -> String {
        let options = QueryOptions::new(command_timeout, Some(1));
        let result = self.executor.run(query, options, cancel).await;

        if !result.is_success {
            return with_error_code(format!("Error executing query: {}", result.message), &result);
        }
        match result.first_value() {
            Some(JsonValue::Null) => "NULL".to_string(),
            Some(JsonValue::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => "No results returned".to_string(),
        }
    }

    /// Run a JSON array of statements as one transaction.
    pub async fn execute_transaction(
        &self,
        queries_json: &str,
        command_timeout: Option<u32>,
        cancel: &CancellationToken,
    ) -> String {
        let queries: Vec<String> = match serde_json::from_str(queries_json) {
            Ok(queries) => queries,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected malformed transaction payload");
                return format!("Error parsing queries JSON: {e}");
            }
        };
        if queries.is_empty() {
            return "No queries provided for transaction".to_string();
        }

        let result = self.executor.run_transaction(&queries, command_timeout, cancel).await;
        if result.is_success {
            result.message
        } else {
            with_error_code(format!("Transaction failed: {}", result.message), &result)
        }
    }

    // ========== Schema tools ==========

    /// Base tables across all user schemas.
    pub async fn list_tables(&self, cancel: &CancellationToken) -> String {
        self.list(ObjectCategory::Tables, cancel).await
    }

    /// Views across all user schemas.
    pub async fn list_views(&self, cancel: &CancellationToken) -> String {
        self.list(ObjectCategory::Views, cancel).await
    }

    /// Procedures across all user schemas.
    pub async fn list_stored_procedures(&self, cancel: &CancellationToken) -> String {
        self.list(ObjectCategory::Procedures, cancel).await
    }

    async fn list(&self, category: ObjectCategory, cancel: &CancellationToken) -> String {
        let outcome = cancellable(self.resolver.all_names(category), cancel).await;
        render(outcome.and_then(|names| pretty(&names)), &format!("listing {}", category.as_str()))
    }

    /// Column descriptors for `schema.table` or a bare table name.
    pub async fn get_table_schema(&self, table_name: &str, cancel: &CancellationToken) -> String {
        let outcome = cancellable(self.resolver.table_columns(table_name), cancel).await;
        let json = outcome.and_then(|columns| {
            let descriptors: Vec<ColumnDescriptor> =
                columns.iter().map(ColumnDescriptor::from).collect();
            pretty(&descriptors)
        });
        render(json, "reading table schema")
    }

    /// Test connectivity, then describe the target database.
    ///
    /// A failed test is reported through `isConnected` rather than as an error.
    pub async fn get_database_info(&self, cancel: &CancellationToken) -> String {
        let tested =
            cancellable(self.tracker.test_connection(self.metadata_timeout_secs), cancel).await;
        if let Err(e) = tested {
            tracing::warn!(error = %e, "Database info requested while unreachable");
        }
        render(pretty(&self.tracker.database_info()), "reading database info")
    }
}

async fn cancellable<T>(
    work: impl Future<Output = Result<T>>,
    cancel: &CancellationToken,
) -> Result<T> {
    select! {
        result = work => result,
        _ = cancel.cancelled() => Err(PgScopeError::Cancelled),
    }
}

fn pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn render(outcome: Result<String>, action: &str) -> String {
    outcome.unwrap_or_else(|e| {
        tracing::error!(error = %e, action, "Tool call failed");
        format!("Error {action}: {e}")
    })
}

fn with_error_code(message: String, result: &QueryResult) -> String {
    match &result.error_code {
        Some(code) => format!("{message} (Error code: {code})"),
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MetadataCache, RowSet};
    use crate::testing::{numbered_rows, sample_catalog, FakeDatabase};
    use serde_json::json;
    use std::time::Duration;

    fn tools(db: &FakeDatabase) -> DatabaseTools {
        let settings = DatabaseSettings::new("host=localhost");
        let tracker = Arc::new(db.tracker());
        let cache = Arc::new(MetadataCache::new(settings.cache_ttl()));
        let executor = Arc::new(QueryExecutor::new(Arc::clone(&tracker), &settings));
        let resolver = Arc::new(ResourceResolver::new(Arc::clone(&tracker), cache, &settings));
        DatabaseTools::new(executor, resolver, tracker, &settings)
    }

    #[tokio::test]
    async fn test_execute_query_serializes_rows() {
        let db = FakeDatabase::new();
        db.add_table("users", &["id", "name"], numbered_rows(2));
        let tools = tools(&db);

        let text = tools
            .execute_query("SELECT id, name FROM users", None, None, &CancellationToken::new())
            .await;
        let result: QueryResult = serde_json::from_str(&text).unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["name"], "user1");
        assert_eq!(result.message, "Query returned 2 row(s).");
    }

    #[tokio::test]
    async fn test_execute_query_without_rows_returns_message() {
        let db = FakeDatabase::new();
        db.set_rows_per_write(4);
        let tools = tools(&db);

        let text = tools
            .execute_query("UPDATE users SET active = false", None, None, &CancellationToken::new())
            .await;
        assert_eq!(text, "4 row(s) affected.");
    }

    #[tokio::test]
    async fn test_execute_query_failures_include_code() {
        let db = FakeDatabase::new();
        let tools = tools(&db);
        let cancel = CancellationToken::new();

        let text = tools.execute_query("SELECT * FROM missing", None, None, &cancel).await;
        assert_eq!(
            text,
            "Error executing query: SQL Error: relation \"missing\" does not exist (Error code: 42P01)"
        );

        let text = tools.execute_query("SELECT 1 -- hi", None, None, &cancel).await;
        assert_eq!(
            text,
            "Error executing query: Security validation failed: SQL comments are not allowed for security reasons"
        );
    }

    #[tokio::test]
    async fn test_scalar_query_renders_first_value() {
        let db = FakeDatabase::new();
        db.on_query(
            "count(*)",
            RowSet { columns: vec!["count".to_string()], rows: vec![vec![json!(42)]] },
        );
        db.on_query(
            "max(email)",
            RowSet { columns: vec!["max".to_string()], rows: vec![vec![json!("a@b.c")]] },
        );
        db.on_query(
            "min(email)",
            RowSet { columns: vec!["min".to_string()], rows: vec![vec![JsonValue::Null]] },
        );
        db.add_table("empty", &["id"], Vec::new());
        let tools = tools(&db);
        let cancel = CancellationToken::new();

        for (query, expected) in [
            ("SELECT count(*) FROM users", "42"),
            ("SELECT max(email) FROM users", "a@b.c"),
            ("SELECT min(email) FROM users", "NULL"),
            ("SELECT id FROM empty", "No results returned"),
        ] {
            assert_eq!(tools.execute_scalar_query(query, None, &cancel).await, expected, "{query}");
        }
    }

    #[tokio::test]
    async fn test_transaction_input_errors() {
        let db = FakeDatabase::new();
        let tools = tools(&db);
        let cancel = CancellationToken::new();

        let text = tools.execute_transaction("not json", None, &cancel).await;
        assert!(text.starts_with("Error parsing queries JSON: "), "{text}");

        let text = tools.execute_transaction("[]", None, &cancel).await;
        assert_eq!(text, "No queries provided for transaction");
        assert_eq!(db.connects(), 0);
    }

    #[tokio::test]
    async fn test_transaction_success_and_failure() {
        let db = FakeDatabase::new();
        let tools = tools(&db);
        let cancel = CancellationToken::new();

        let ok = tools
            .execute_transaction(
                r#"["INSERT INTO t VALUES (1)", "UPDATE t SET x = 2 WHERE id = 1"]"#,
                None,
                &cancel,
            )
            .await;
        assert_eq!(ok, "Transaction completed successfully. 2 statement(s) executed.");

        db.fail_statements_containing("VALUES (3)");
        let failed = tools
            .execute_transaction(r#"["INSERT INTO t VALUES (3)"]"#, Some(5), &cancel)
            .await;
        assert!(
            failed.starts_with("Transaction failed: SQL Error: Statement 1 failed: "),
            "{failed}"
        );
        assert!(failed.ends_with("(Error code: 23505)"), "{failed}");
    }

    #[tokio::test]
    async fn test_list_tools_span_all_schemas() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        let tools = tools(&db);
        let cancel = CancellationToken::new();

        let tables: Vec<String> = serde_json::from_str(&tools.list_tables(&cancel).await).unwrap();
        assert_eq!(tables, vec!["invoices", "orders", "users"]);

        let views: Vec<String> = serde_json::from_str(&tools.list_views(&cancel).await).unwrap();
        assert_eq!(views, vec!["active_users"]);

        let procedures: Vec<String> =
            serde_json::from_str(&tools.list_stored_procedures(&cancel).await).unwrap();
        assert_eq!(procedures, vec!["close_month"]);
    }

    #[tokio::test]
    async fn test_list_failure_is_rendered() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        db.fail_connects("connection refused");
        let tools = tools(&db);

        let text = tools.list_views(&CancellationToken::new()).await;
        assert_eq!(text, "Error listing views: Connection error: connection refused");
    }

    #[tokio::test]
    async fn test_table_schema_descriptors() {
        let db = FakeDatabase::with_catalog(sample_catalog());
        let tools = tools(&db);

        let text = tools.get_table_schema("users", &CancellationToken::new()).await;
        let columns: Vec<ColumnDescriptor> = serde_json::from_str(&text).unwrap();
        let email = columns.iter().find(|c| c.name == "email").unwrap();
        assert_eq!(email.max_length, "255");
        assert_eq!(columns[0].max_length, "null");
        assert!(text.contains("\"dataType\""));
    }

    #[tokio::test]
    async fn test_database_info_omits_credentials() {
        let db = FakeDatabase::new();
        let tools = tools(&db);

        let text = tools.get_database_info(&CancellationToken::new()).await;
        let info: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(info["serverName"], "localhost");
        assert_eq!(info["databaseName"], "testdb");
        assert_eq!(info["isConnected"], true);
        assert!(!info["lastConnected"].is_null());
        assert!(!text.to_lowercase().contains("password"));
        assert!(!text.contains("host="));
    }

    #[tokio::test]
    async fn test_database_info_reports_unreachable() {
        let db = FakeDatabase::new();
        db.fail_connects("timeout");
        let tools = tools(&db);

        let cancel = CancellationToken::new();
        let text = tokio::time::timeout(Duration::from_secs(5), tools.get_database_info(&cancel))
            .await
            .unwrap();
        let info: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(info["isConnected"], false);
    }
}
