//! Execution log repository.

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::ExecutionLogRow;

/// Database operations on structured execution logs.
pub struct LogRepository;

impl LogRepository {
    /// Append one log event.
    pub async fn append(
        pool: &DatabasePool,
        run_id: &str,
        node_id: &str,
        level: &str,
        message: &str,
        at: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO execution_logs (run_id, node_id, level, message, at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(node_id)
        .bind(level)
        .bind(message)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Events for a run after the given row id, oldest first.
    pub async fn list_after(
        pool: &DatabasePool,
        run_id: &str,
        after_id: i64,
    ) -> DbResult<Vec<ExecutionLogRow>> {
        Ok(sqlx::query_as::<_, ExecutionLogRow>(
            "SELECT * FROM execution_logs WHERE run_id = ? AND id > ? ORDER BY id",
        )
        .bind(run_id)
        .bind(after_id)
        .fetch_all(pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;

    #[tokio::test]
    async fn test_append_and_paginate() {
        let pool = test_pool().await;
        for i in 0..3 {
            LogRepository::append(
                &pool,
                "run-1",
                "scan",
                "info",
                &format!("event {}", i),
                "2026-08-01T00:00:00Z",
            )
            .await
            .unwrap();
        }
        LogRepository::append(&pool, "run-2", "scan", "info", "other", "2026-08-01T00:00:00Z")
            .await
            .unwrap();

        let all = LogRepository::list_after(&pool, "run-1", 0).await.unwrap();
        assert_eq!(all.len(), 3);
        let rest = LogRepository::list_after(&pool, "run-1", all[0].id).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].message, "event 1");
    }
}
