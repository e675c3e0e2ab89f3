//! Journal error types.

use thiserror::Error;

/// Errors raised by journal backends.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The backing store failed.
    #[error("journal storage error: {0}")]
    Storage(String),

    /// A record body could not be serialized or deserialized.
    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No records exist for the requested run.
    #[error("no journal for run '{0}'")]
    NotFound(String),
}
