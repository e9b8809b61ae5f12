//! Error types for the PostgreSQL storage backend.

use roomgate_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// Errors specific to the PostgreSQL storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(#[from] SqlxError),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Pool error.
    #[error("pool error: {message}")]
    Pool { message: String },
}

impl PostgresError {
    /// Creates a new pool error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        StorageError::backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PostgresError>;
