//! Error types for query construction and compilation.

use thiserror::Error;

/// Errors raised while validating, merging or compiling query fragments.
///
/// Both variants are deterministic and local: they are produced before any
/// connection is acquired or any text reaches the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Structural validation failed (clause ordering, missing read/write
    /// clause, undefined alias) or a raw fragment could not be interpreted.
    #[error("Query compilation failed: {reason}")]
    CompilationFailed { reason: String },

    /// Two merged fragments bind the same parameter name to different values.
    #[error("Parameter '{key}' is bound to conflicting values")]
    ParameterConflict { key: String },
}

impl QueryError {
    pub fn compilation(reason: impl Into<String>) -> Self {
        QueryError::CompilationFailed {
            reason: reason.into(),
        }
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        QueryError::ParameterConflict { key: key.into() }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
