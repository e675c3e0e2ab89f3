//! In-memory journal backend.
//!
//! The default backend for tests and ephemeral deployments, mirroring
//! the contract a database-backed implementation must provide.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::JournalError;
use crate::record::TransitionRecord;
use crate::traits::RunJournal;

/// Journal keeping every record in process memory.
///
/// Cloning shares the underlying store, so a clone handed to the engine
/// observes the same records as the original.
#[derive(Clone, Default)]
pub struct MemoryJournal {
    runs: Arc<RwLock<HashMap<String, BTreeMap<u64, TransitionRecord>>>>,
}

impl MemoryJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored for a run.
    pub fn len(&self, run_id: &str) -> usize {
        self.runs.read().get(run_id).map(BTreeMap::len).unwrap_or(0)
    }

    /// Whether the journal holds no runs at all.
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl RunJournal for MemoryJournal {
    async fn append(&self, record: TransitionRecord) -> Result<(), JournalError> {
        let mut runs = self.runs.write();
        let run = runs.entry(record.run_id.clone()).or_default();
        // First write wins; replaying a completed transition is a no-op.
        run.entry(record.seq).or_insert(record);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Vec<TransitionRecord>, JournalError> {
        let runs = self.runs.read();
        Ok(runs
            .get(run_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn run_ids(&self) -> Result<Vec<String>, JournalError> {
        let runs = self.runs.read();
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_load_ordered() {
        let journal = MemoryJournal::new();
        journal
            .append(TransitionRecord::new("run-1", 1, json!({"t": "b"})))
            .await
            .unwrap();
        journal
            .append(TransitionRecord::new("run-1", 0, json!({"t": "a"})))
            .await
            .unwrap();

        let records = journal.load("run-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 0);
        assert_eq!(records[1].seq, 1);
    }

    #[tokio::test]
    async fn test_duplicate_append_is_noop() {
        let journal = MemoryJournal::new();
        journal
            .append(TransitionRecord::new("run-1", 0, json!({"t": "first"})))
            .await
            .unwrap();
        journal
            .append(TransitionRecord::new("run-1", 0, json!({"t": "second"})))
            .await
            .unwrap();

        let records = journal.load("run-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].body["t"], "first");
    }

    #[tokio::test]
    async fn test_unknown_run_loads_empty() {
        let journal = MemoryJournal::new();
        assert!(journal.load("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_ids_sorted() {
        let journal = MemoryJournal::new();
        journal
            .append(TransitionRecord::new("run-b", 0, json!({})))
            .await
            .unwrap();
        journal
            .append(TransitionRecord::new("run-a", 0, json!({})))
            .await
            .unwrap();
        assert_eq!(journal.run_ids().await.unwrap(), vec!["run-a", "run-b"]);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let journal = MemoryJournal::new();
        let clone = journal.clone();
        clone
            .append(TransitionRecord::new("run-1", 0, json!({})))
            .await
            .unwrap();
        assert_eq!(journal.len("run-1"), 1);
    }
}
