//! Query error types
//!
//! Defines the error conditions raised while parsing and compiling queries.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Query text is not well formed
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// AST could not be lowered into criteria
    #[error("Compile error: {0}")]
    Compile(String),

    /// Invalid time range specified
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),
}

impl QueryError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        QueryError::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Byte offset of a syntax error, if this is one
    pub fn position(&self) -> Option<usize> {
        match self {
            QueryError::Syntax { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
