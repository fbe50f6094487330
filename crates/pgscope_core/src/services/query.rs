//! Validated query execution.
//!
//! Every statement is validated, then run on its own tracked connection:
//! - Reads (`SELECT ...`) are streamed and capped at `max_rows`
//! - Everything else reports rows affected
//! - Transactions run all statements on one connection, atomically
//!
//! Execution races the caller's `CancellationToken`; a cancelled call drops
//! its connection guard, which releases the connection.

use std::sync::Arc;
use std::time::Instant;

use tokio::select;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DatabaseSettings;
use crate::error::{PgScopeError, Result};
use crate::models::{QueryResult, StatementKind};
use crate::services::connection::ConnectionTracker;
use crate::services::validation::StatementValidator;

/// Per-call overrides of the configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Statement timeout in seconds
    pub command_timeout_secs: Option<u32>,
    /// Row cap for reads
    pub max_rows: Option<usize>,
}

impl QueryOptions {
    pub fn new(command_timeout_secs: Option<u32>, max_rows: Option<usize>) -> Self {
        Self { command_timeout_secs, max_rows }
    }
}

/// Runs validated statements against tracked connections.
pub struct QueryExecutor {
    tracker: Arc<ConnectionTracker>,
    validator: StatementValidator,
    default_timeout_secs: u32,
    default_max_rows: usize,
}

impl QueryExecutor {
    pub fn new(tracker: Arc<ConnectionTracker>, settings: &DatabaseSettings) -> Self {
        Self {
            tracker,
            validator: StatementValidator::new(),
            default_timeout_secs: settings.default_command_timeout_secs,
            default_max_rows: settings.default_max_rows,
        }
    }

    /// Validate and run one statement.
    ///
    /// Never fails: every error becomes a failed `QueryResult`. A rejected
    /// statement never opens a connection.
    pub async fn run(
        &self,
        query: &str,
        options: QueryOptions,
        cancel: &CancellationToken,
    ) -> QueryResult {
        let verdict = self.validator.validate(query);
        if !verdict.is_valid {
            return QueryResult::from_error(&PgScopeError::validation(verdict.reason));
        }

        let timeout = options.command_timeout_secs.unwrap_or(self.default_timeout_secs);
        let max_rows = options.max_rows.unwrap_or(self.default_max_rows);
        let kind = StatementKind::detect(query);
        let query_id = Uuid::new_v4();
        let start = Instant::now();

        tracing::debug!(
            query_id = %query_id,
            kind = ?kind,
            timeout_secs = timeout,
            max_rows,
            "Executing query"
        );

        let outcome = select! {
            result = self.execute(query, kind, timeout, max_rows) => result,
            _ = cancel.cancelled() => Err(PgScopeError::Cancelled),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                tracing::debug!(
                    query_id = %query_id,
                    elapsed_ms,
                    row_count = result.row_count,
                    has_more_rows = result.has_more_rows,
                    "Query completed"
                );
                if result.has_more_rows {
                    tracing::info!(query_id = %query_id, max_rows, "Query result was limited");
                }
                result
            }
            Err(e) => {
                log_failure(query_id, &e, "Query failed");
                QueryResult::from_error(&e)
            }
        }
    }

    async fn execute(
        &self,
        sql: &str,
        kind: StatementKind,
        timeout_secs: u32,
        max_rows: usize,
    ) -> Result<QueryResult> {
        let mut conn = self.tracker.open(timeout_secs).await?;

        let result = match kind {
            StatementKind::Read => {
                // One extra row tells us whether the cap cut anything off
                let set = conn.query(sql, &[], Some(max_rows.saturating_add(1))).await?;
                let has_more_rows = set.len() > max_rows;
                let (columns, mut rows) = set.into_rows();
                rows.truncate(max_rows);

                let message = if has_more_rows {
                    format!(
                        "Query returned {} rows (limited from a larger result set). \
                         Use pagination parameters to see more results.",
                        rows.len()
                    )
                } else if rows.is_empty() {
                    "Query returned no rows.".to_string()
                } else {
                    format!("Query returned {} row(s).", rows.len())
                };
                QueryResult::read(columns, rows, has_more_rows, message)
            }
            StatementKind::Write => {
                let affected = conn.execute(sql).await?;
                QueryResult::affected(affected, format!("{affected} row(s) affected."))
            }
        };

        conn.release();
        Ok(result)
    }

    /// Validate every statement, then run them all in one transaction.
    ///
    /// The first failing statement rolls the whole transaction back.
    pub async fn run_transaction(
        &self,
        queries: &[String],
        command_timeout_secs: Option<u32>,
        cancel: &CancellationToken,
    ) -> QueryResult {
        if queries.is_empty() {
            return QueryResult::failure("No queries provided for transaction", None);
        }

        for (index, query) in queries.iter().enumerate() {
            let verdict = self.validator.validate(query);
            if !verdict.is_valid {
                let reason = format!("Statement {}: {}", index + 1, verdict.reason);
                return QueryResult::from_error(&PgScopeError::validation(reason));
            }
        }

        let timeout = command_timeout_secs.unwrap_or(self.default_timeout_secs);
        let transaction_id = Uuid::new_v4();
        tracing::debug!(
            transaction_id = %transaction_id,
            statements = queries.len(),
            timeout_secs = timeout,
            "Executing transaction"
        );

        let outcome = select! {
            result = self.execute_transaction(queries, timeout) => result,
            _ = cancel.cancelled() => Err(PgScopeError::Cancelled),
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(
                    transaction_id = %transaction_id,
                    rows_affected = result.rows_affected,
                    "Transaction committed"
                );
                result
            }
            Err(e) => {
                log_failure(transaction_id, &e, "Transaction failed");
                QueryResult::from_error(&e)
            }
        }
    }

    async fn execute_transaction(&self, queries: &[String], timeout_secs: u32) -> Result<QueryResult> {
        let mut conn = self.tracker.open(timeout_secs).await?;
        conn.begin().await?;
        tracing::debug!(connection_id = %conn.id(), "Transaction started");

        let mut total: u64 = 0;
        for (index, query) in queries.iter().enumerate() {
            // Every statement is drained: an error raised mid-result aborts the
            // transaction server-side and must not reach COMMIT unnoticed
            let outcome = match StatementKind::detect(query) {
                StatementKind::Read => conn.execute(query).await.map(|_| 0),
                StatementKind::Write => conn.execute(query).await,
            };

            match outcome {
                Ok(affected) => total += affected,
                Err(e) => {
                    if let Err(rollback_err) = conn.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(statement_failed(index + 1, e));
                }
            }
        }

        conn.commit().await?;
        conn.release();

        Ok(QueryResult::affected(
            total,
            format!("Transaction completed successfully. {} statement(s) executed.", queries.len()),
        ))
    }
}

/// Prefix a transaction error with the 1-based statement number, keeping its
/// kind and SQLSTATE.
fn statement_failed(number: usize, err: PgScopeError) -> PgScopeError {
    match err {
        PgScopeError::Database { message, code, detail, hint, position } => {
            PgScopeError::Database {
                message: format!("Statement {number} failed: {message}"),
                code,
                detail,
                hint,
                position,
            }
        }
        PgScopeError::Connection { message, source } => PgScopeError::Connection {
            message: format!("Statement {number} failed: {message}"),
            source,
        },
        other => other,
    }
}

fn log_failure(id: Uuid, err: &PgScopeError, message: &str) {
    match err {
        PgScopeError::Cancelled => tracing::debug!(id = %id, "Cancelled by caller"),
        PgScopeError::Database { code, .. } => {
            tracing::error!(id = %id, code = ?code, error = %err, "{message}")
        }
        _ => tracing::error!(id = %id, error = %err, "{message}"),
    }
}
