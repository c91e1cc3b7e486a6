//! Error types for pooled execution

use quiver_query::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Pool and executor error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// Query validation or composition failed before execution
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Checkout waited past the configured timeout
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    ConnectionTimeout(Duration),

    /// Checkout rejected because the pool is drained
    #[error("Connection pool exhausted")]
    ConnectionPoolExhausted,

    /// Transaction body, BEGIN or COMMIT failed; `source` is the original error
    #[error("Transaction failed: {reason}")]
    TransactionFailed {
        reason: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Failed to load extension '{name}': {reason}")]
    ExtensionLoadFailed { name: String, reason: String },

    /// Error reported by the engine binding
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for pool and executor operations
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub(crate) fn transaction(reason: impl Into<String>, source: DbError) -> Self {
        Self::TransactionFailed {
            reason: reason.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping nested transaction failures.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::TransactionFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
