//! The `RunJournal` storage trait.
//!
//! Implement this trait to persist engine transitions on any backend.
//! The contract every implementation must honor:
//!
//! - **Idempotent appends.** A record whose `(run_id, seq)` already
//!   exists is silently ignored; the stored record wins.
//! - **Ordered loads.** `load` returns records sorted by `seq`.
//! - **Serialized writes per run.** Appends for one run must not
//!   interleave in a way that loses records; the engine already
//!   serializes its own appends per run, so a plain transactional insert
//!   is sufficient.

use async_trait::async_trait;

use crate::error::JournalError;
use crate::record::TransitionRecord;

/// Storage backend for run transitions.
#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Persist one transition. Appending an already-stored `(run_id,
    /// seq)` pair is a no-op.
    async fn append(&self, record: TransitionRecord) -> Result<(), JournalError>;

    /// Load all transitions for a run, ordered by sequence number.
    /// Returns an empty vector for an unknown run.
    async fn load(&self, run_id: &str) -> Result<Vec<TransitionRecord>, JournalError>;

    /// Ids of every run with at least one record, sorted.
    async fn run_ids(&self) -> Result<Vec<String>, JournalError>;
}
