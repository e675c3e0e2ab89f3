//! Engine-level error types.

use thiserror::Error;

/// Failures resolving a parked suspension. These surface to the API
/// caller; the suspension itself stays pending unless noted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No suspension with this id exists.
    #[error("suspension '{0}' does not exist")]
    NotFound(String),

    /// The suspension was already resolved exactly once.
    #[error("suspension '{0}' is already resolved")]
    AlreadyResolved(String),

    /// The suspension expired or was revoked by cancellation.
    #[error("suspension '{0}' is no longer pending")]
    Revoked(String),

    /// The supplied token does not match.
    #[error("resolution token does not match")]
    InvalidToken,

    /// The payload does not conform to the declared input schema.
    #[error("resolution payload is invalid: {0}")]
    InvalidPayload(String),
}

/// Engine operation failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No run with this id is known to the engine.
    #[error("run '{0}' does not exist")]
    UnknownRun(String),

    /// The journal could not be read or written.
    #[error(transparent)]
    Journal(#[from] shipsec_checkpoint::JournalError),

    /// A journal could not be replayed into a consistent run state.
    #[error("replay of run '{run_id}' failed: {message}")]
    Replay { run_id: String, message: String },

    /// A suspension resolution was rejected.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The run's scheduler is gone (engine shutting down).
    #[error("run '{0}' is not accepting commands")]
    SchedulerGone(String),
}
