//! Error types for the REST server.
//!
//! This module defines all error types using `thiserror` for ergonomic error
//! handling. Only two failure modes are meant to escape the pool: construction
//! failure (no usable connections at startup) and pool exhaustion (a bounded
//! acquire wait timed out). Everything else is either recovered internally or
//! translated into an HTTP response by the `IntoResponse` impl below.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Startup probing produced zero usable connections across all targets.
    /// This is the only fatal error in the component: the server must not start.
    #[error("no valid database connections available")]
    NoConnections,

    /// A bounded acquire wait elapsed without an eligible connection becoming
    /// idle. Carries the pool state observed at timeout for diagnostics.
    #[error(
        "timeout waiting for database connection ({} operation): {primary_idle} primary, {replica_idle} replica connections available",
        if *.read_only { "READ" } else { "WRITE" }
    )]
    PoolExhausted {
        read_only: bool,
        primary_idle: usize,
        replica_idle: usize,
    },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    #[error("table '{table}' has no simple primary key")]
    NoPrimaryKey { table: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Create an error for tables without a single-column primary key.
    pub fn no_primary_key(table: impl Into<String>) -> Self {
        Self::NoPrimaryKey {
            table: table.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for failures a caller may reasonably retry after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::Connection { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::Io(io_err) => DbError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DbError::connection(format!("protocol error: {}", msg)),
            sqlx::Error::RowNotFound => DbError::database("no rows returned", None),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("database worker crashed"),
            _ => DbError::internal(format!("unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Map the error taxonomy onto HTTP responses.
///
/// Pool exhaustion is the "service temporarily unavailable" path (503), so
/// load balancers and clients can distinguish it from hard failures. Internal
/// details are logged, not leaked.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            DbError::UnknownTable { table } => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "unknown_table",
                    "message": format!("table '{}' not found", table),
                }),
            ),
            DbError::NoPrimaryKey { .. } | DbError::InvalidInput { .. } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "invalid_request",
                    "message": self.to_string(),
                }),
            ),
            DbError::PoolExhausted {
                read_only,
                primary_idle,
                replica_idle,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "pool_exhausted",
                    "message": self.to_string(),
                    "read_only": read_only,
                    "primary_idle": primary_idle,
                    "replica_idle": replica_idle,
                }),
            ),
            DbError::NoConnections | DbError::Connection { .. } => {
                tracing::error!(error = %self, "database unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error": "database_unavailable",
                        "message": "database temporarily unavailable",
                    }),
                )
            }
            DbError::Database { sql_state, .. } => {
                tracing::error!(error = %self, sql_state = ?sql_state, "query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "database_error",
                        "message": self.to_string(),
                    }),
                )
            }
            DbError::Internal { .. } => {
                tracing::error!(error = %self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal_error",
                        "message": "an internal error occurred",
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_display_carries_counts() {
        let err = DbError::PoolExhausted {
            read_only: false,
            primary_idle: 0,
            replica_idle: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("WRITE"));
        assert!(msg.contains("0 primary"));
        assert!(msg.contains("1 replica"));
    }

    #[test]
    fn test_pool_exhausted_read_display() {
        let err = DbError::PoolExhausted {
            read_only: true,
            primary_idle: 2,
            replica_idle: 0,
        };
        assert!(err.to_string().contains("READ"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(
            DbError::PoolExhausted {
                read_only: true,
                primary_idle: 0,
                replica_idle: 0
            }
            .is_retryable()
        );
        assert!(DbError::connection("refused").is_retryable());
        assert!(!DbError::unknown_table("nope").is_retryable());
        assert!(!DbError::invalid_input("bad").is_retryable());
    }

    #[test]
    fn test_database_error_keeps_sql_state() {
        let err = DbError::database("syntax error", Some("42601".to_string()));
        match err {
            DbError::Database { sql_state, .. } => {
                assert_eq!(sql_state.as_deref(), Some("42601"));
            }
            _ => panic!("expected Database variant"),
        }
    }
}
