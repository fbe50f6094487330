//! Error types for pgscope.
//!
//! Every failure the core can produce is one of these variants. Callers at the
//! tool/resource boundary turn them into textual or structured results, so no
//! error ever crosses the transport.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PgScopeError>;

/// Main error type for pgscope.
#[derive(Debug, Error)]
pub enum PgScopeError {
    /// Statement rejected by the validator. Never reaches the database.
    #[error("Security validation failed: {reason}")]
    Validation {
        /// Rejection reason reported by the matching rule.
        reason: String,
    },

    /// Opening or using a database connection failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The database rejected or failed a statement.
    #[error("SQL Error: {message}")]
    Database {
        /// PostgreSQL error message.
        message: String,
        /// SQLSTATE code (e.g., "42P01").
        code: Option<String>,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
    },

    /// A resource address did not resolve to a known object.
    #[error("Unknown resource URI: {uri}")]
    UnknownResource {
        /// The address as supplied by the caller.
        uri: String,
        /// Why it did not resolve.
        reason: Option<String>,
    },

    /// Malformed caller input or unserializable output.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

impl PgScopeError {
    // ========== Constructors ==========

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a database error carrying only a message and SQLSTATE.
    pub fn database(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Database { message: message.into(), code, detail: None, hint: None, position: None }
    }

    /// Create an unknown-resource error.
    pub fn unknown_resource(uri: impl Into<String>) -> Self {
        Self::UnknownResource { uri: uri.into(), reason: None }
    }

    /// Create an unknown-resource error with an explanation.
    pub fn unknown_resource_with_reason(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnknownResource { uri: uri.into(), reason: Some(reason.into()) }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    // ========== Methods ==========

    /// Check if this error represents a cancelled operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error was reported by the database itself.
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Database { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation",
            Self::Connection { .. } => "Connection",
            Self::Database { .. } => "Database",
            Self::UnknownResource { .. } => "Resource",
            Self::Serialization { .. } => "Serialization",
            Self::Cancelled => "Cancelled",
            Self::Config { .. } => "Config",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the caller.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Validation { .. } => Some("Rewrite the statement without the restricted pattern"),
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::Database { hint, .. } => hint.as_deref(),
            Self::UnknownResource { .. } => {
                Some("Use an address of the form pgscope://schemas/{schema}[/{category}[/{name}]]")
            }
            Self::Serialization { .. } => Some("Check that the input is well-formed JSON"),
            Self::Cancelled => None,
            Self::Config { .. } => None,
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get the SQLSTATE code (if the database reported one).
    pub fn db_code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Message without the category prefix, as shown in results.
    pub fn plain_message(&self) -> String {
        match self {
            Self::Validation { reason } => reason.clone(),
            Self::Connection { message, .. }
            | Self::Serialization { message, .. }
            | Self::Config { message }
            | Self::Internal { message } => message.clone(),
            Self::Database { message, .. } => message.clone(),
            Self::UnknownResource { uri, reason } => match reason {
                Some(reason) => format!("{uri} ({reason})"),
                None => uri.clone(),
            },
            Self::Cancelled => "Operation cancelled".to_string(),
        }
    }

    /// Convert to caller-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::Database { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            Self::UnknownResource { reason, .. } => reason.clone(),
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }
}

/// Caller-displayable error information.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Category name (e.g., "Database Error").
    pub error_type: String,
    /// Caller-facing message.
    pub message: String,
    /// Actionable suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Technical detail (SQLSTATE, position, detail).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to PgScopeError.
impl From<tokio_postgres::Error> for PgScopeError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code_str = db_err.code().code();

            // Connection exceptions (08xxx) and authorization failures (28xxx)
            if code_str.starts_with("08") || code_str.starts_with("28") {
                return PgScopeError::Connection { message, source: Some(Box::new(err)) };
            }

            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });

            return PgScopeError::Database {
                message,
                code: Some(code_str.to_string()),
                detail: db_err.detail().map(String::from),
                hint: db_err.hint().map(String::from),
                position,
            };
        }

        if err.is_closed() {
            return PgScopeError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        PgScopeError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from serde_json::Error to PgScopeError.
impl From<serde_json::Error> for PgScopeError {
    fn from(err: serde_json::Error) -> Self {
        PgScopeError::Serialization { message: err.to_string(), source: Some(Box::new(err)) }
    }
}
