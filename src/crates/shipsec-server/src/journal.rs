//! `RunJournal` implementation over the `run_transitions` table.
//!
//! The engine's write-ahead transitions land here; `INSERT OR IGNORE`
//! on the `(run_id, seq)` primary key gives the idempotent-append
//! contract for free.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use shipsec_checkpoint::{JournalError, RunJournal, TransitionRecord};

use crate::db::DatabasePool;

/// Journal backed by the relational store.
#[derive(Clone)]
pub struct SqliteJournal {
    pool: DatabasePool,
}

impl SqliteJournal {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunJournal for SqliteJournal {
    async fn append(&self, record: TransitionRecord) -> Result<(), JournalError> {
        let body = serde_json::to_string(&record.body)?;
        sqlx::query(
            "INSERT OR IGNORE INTO run_transitions (run_id, seq, at, body) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.run_id)
        .bind(record.seq as i64)
        .bind(record.at.to_rfc3339())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Vec<TransitionRecord>, JournalError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT seq, at, body FROM run_transitions WHERE run_id = ? ORDER BY seq",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(seq, at, body)| {
                let body: Value = serde_json::from_str(&body)?;
                let at = DateTime::parse_from_rfc3339(&at)
                    .map_err(|e| JournalError::Storage(format!("bad timestamp: {}", e)))?
                    .with_timezone(&chrono::Utc);
                Ok(TransitionRecord {
                    run_id: run_id.to_string(),
                    seq: seq as u64,
                    at,
                    body,
                })
            })
            .collect()
    }

    async fn run_ids(&self) -> Result<Vec<String>, JournalError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT run_id FROM run_transitions ORDER BY run_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| JournalError::Storage(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_load_roundtrip() {
        let journal = SqliteJournal::new(test_pool().await);
        journal
            .append(TransitionRecord::new("run-1", 0, json!({"type": "run_created"})))
            .await
            .unwrap();
        journal
            .append(TransitionRecord::new(
                "run-1",
                1,
                json!({"type": "node_running", "node": "scan", "attempt": 1}),
            ))
            .await
            .unwrap();

        let records = journal.load("run-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].body["node"], "scan");
        assert_eq!(journal.run_ids().await.unwrap(), vec!["run-1"]);
    }

    #[tokio::test]
    async fn test_duplicate_seq_is_noop() {
        let journal = SqliteJournal::new(test_pool().await);
        journal
            .append(TransitionRecord::new("run-1", 0, json!({"first": true})))
            .await
            .unwrap();
        journal
            .append(TransitionRecord::new("run-1", 0, json!({"second": true})))
            .await
            .unwrap();

        let records = journal.load("run-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].body["first"], true);
    }
}
