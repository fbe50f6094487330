//! Query execution models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::PgScopeError;

/// One result row: column name to value, in column order.
pub type Row = Map<String, JsonValue>;

/// How a statement is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    /// Row-returning statement, streamed under the row cap
    Read,
    /// Everything else, reported as rows affected
    Write,
}

impl StatementKind {
    /// Decide how to run `sql`: only statements that start with `SELECT` are reads.
    pub fn detect(sql: &str) -> Self {
        let trimmed = sql.trim_start();
        let is_select = trimmed
            .get(..6)
            .map(|head| head.eq_ignore_ascii_case("SELECT"))
            .unwrap_or(false);

        if is_select {
            Self::Read
        } else {
            Self::Write
        }
    }
}

/// Outcome of statement validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    /// Whether the statement may be executed.
    pub is_valid: bool,
    /// Rejection reason; empty when valid.
    pub reason: String,
}

impl ValidationVerdict {
    /// A passing verdict.
    pub fn allowed() -> Self {
        Self { is_valid: true, reason: String::new() }
    }

    /// A failing verdict with the given reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { is_valid: false, reason: reason.into() }
    }

    /// Convert into a `Result`, mapping rejection to a validation error.
    pub fn into_result(self) -> Result<(), PgScopeError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(PgScopeError::validation(self.reason))
        }
    }
}

/// Results from query execution.
///
/// `rows.len() == row_count` always holds; use the constructors rather than
/// building the struct by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Number of rows in `rows`
    pub row_count: usize,
    /// Whether the database had more rows than the cap allowed
    pub has_more_rows: bool,
    /// Whether the statement succeeded
    pub is_success: bool,
    /// Informational or error message
    pub message: String,
    /// Rows affected (for writes and transactions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// Database-native error code (SQLSTATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl QueryResult {
    /// Successful read result.
    pub fn read(
        columns: Vec<String>,
        rows: Vec<Row>,
        has_more_rows: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            columns,
            row_count: rows.len(),
            rows,
            has_more_rows,
            is_success: true,
            message: message.into(),
            rows_affected: None,
            error_code: None,
        }
    }

    /// Successful write or transaction result.
    pub fn affected(rows_affected: u64, message: impl Into<String>) -> Self {
        Self {
            is_success: true,
            message: message.into(),
            rows_affected: Some(rows_affected),
            ..Self::default()
        }
    }

    /// Failed result.
    pub fn failure(message: impl Into<String>, error_code: Option<String>) -> Self {
        Self { is_success: false, message: message.into(), error_code, ..Self::default() }
    }

    /// Failed result describing `err`.
    ///
    /// Only database-reported failures carry an error code.
    pub fn from_error(err: &PgScopeError) -> Self {
        match err {
            PgScopeError::Cancelled => Self::failure("Query was cancelled", None),
            PgScopeError::Database { code, .. } => Self::failure(err.to_string(), code.clone()),
            PgScopeError::Connection { message, .. } => Self::failure(message.clone(), None),
            _ => Self::failure(err.to_string(), None),
        }
    }

    /// Check if the result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if any.
    pub fn first_value(&self) -> Option<&JsonValue> {
        let column = self.columns.first()?;
        self.rows.first()?.get(column)
    }
}
