//! The durable transition record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One engine state transition, as persisted.
///
/// The `(run_id, seq)` pair identifies a transition; appending the same
/// pair twice must be a no-op in every backend so replay after a crash
/// is idempotent. The body is the engine's own serialized transition
/// vocabulary and is opaque to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Run the transition belongs to.
    pub run_id: String,
    /// Monotone sequence number within the run.
    pub seq: u64,
    /// Wall-clock time the transition was recorded.
    pub at: DateTime<Utc>,
    /// Engine-defined transition payload.
    pub body: Value,
}

impl TransitionRecord {
    /// A record stamped with the current time.
    pub fn new(run_id: impl Into<String>, seq: u64, body: Value) -> Self {
        Self {
            run_id: run_id.into(),
            seq,
            at: Utc::now(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_roundtrip() {
        let record = TransitionRecord::new("run-1", 7, json!({"type": "node_ready", "node": "scan"}));
        let text = serde_json::to_string(&record).unwrap();
        let back: TransitionRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
