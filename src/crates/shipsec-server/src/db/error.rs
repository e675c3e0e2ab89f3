//! Database error classification.

use thiserror::Error;

/// Result alias for repository operations.
pub type DbResult<T> = Result<T, DatabaseError>;

/// Wrapper classifying sqlx failures for the API layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Whether the failure is a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::Sqlx(sqlx::Error::RowNotFound))
    }

    /// Whether the failure is a uniqueness or constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            DatabaseError::Sqlx(sqlx::Error::Database(err)) => {
                err.message().contains("UNIQUE") || err.message().contains("constraint")
            }
            _ => false,
        }
    }
}
