//! Error types for the aggregator.

use thiserror::Error;

/// Common error type for the aggregator.
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// Database error.
    ///
    /// Wraps failures from any database backend. Errors from sqlx are
    /// converted automatically.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Remote feed could not be retrieved (network, timeout, non-2xx, size).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Feed document could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for AggregatorError {
    fn from(e: sqlx::Error) -> Self {
        AggregatorError::Database(e.to_string())
    }
}

/// Result type alias for aggregator operations.
pub type Result<T> = std::result::Result<T, AggregatorError>;
