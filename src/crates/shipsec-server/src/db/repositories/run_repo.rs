//! Run repository.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::RunRow;

/// Database operations on run rows.
pub struct RunRepository;

impl RunRepository {
    /// Record a newly triggered run.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        workflow_id: &str,
        version_id: &str,
        plan_hash: &str,
        trigger_kind: &str,
        trigger_source: Option<&str>,
        inputs: &str,
    ) -> DbResult<RunRow> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query_as::<_, RunRow>(
            "INSERT INTO runs (id, workflow_id, version_id, plan_hash, status, trigger_kind,
                               trigger_source, inputs, created_at)
             VALUES (?, ?, ?, ?, 'PENDING', ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(workflow_id)
        .bind(version_id)
        .bind(plan_hash)
        .bind(trigger_kind)
        .bind(trigger_source)
        .bind(inputs)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Get a run row by id.
    pub async fn get(pool: &DatabasePool, id: &str) -> DbResult<Option<RunRow>> {
        Ok(sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// Update the status mirror (terminal statuses also stamp
    /// `finished_at`).
    pub async fn update_status(
        pool: &DatabasePool,
        id: &str,
        status: &str,
        error: Option<&str>,
        terminal: bool,
    ) -> DbResult<()> {
        let finished_at = terminal.then(|| Utc::now().to_rfc3339());
        sqlx::query("UPDATE runs SET status = ?, error = ?, finished_at = COALESCE(?, finished_at) WHERE id = ?")
            .bind(status)
            .bind(error)
            .bind(finished_at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Runs whose mirrored status is not terminal (recovery candidates
    /// at startup).
    pub async fn list_unfinished(pool: &DatabasePool) -> DbResult<Vec<RunRow>> {
        Ok(sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')
             ORDER BY created_at",
        )
        .fetch_all(pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;

    #[tokio::test]
    async fn test_create_and_status_updates() {
        let pool = test_pool().await;
        let run = RunRepository::create(
            &pool, "run-1", "wf-1", "ver-1", "hash", "manual", None, "{}",
        )
        .await
        .unwrap();
        assert_eq!(run.status, "PENDING");

        RunRepository::update_status(&pool, "run-1", "RUNNING", None, false)
            .await
            .unwrap();
        let unfinished = RunRepository::list_unfinished(&pool).await.unwrap();
        assert_eq!(unfinished.len(), 1);

        RunRepository::update_status(&pool, "run-1", "FAILED", Some("[scan] boom"), true)
            .await
            .unwrap();
        let run = RunRepository::get(&pool, "run-1").await.unwrap().unwrap();
        assert_eq!(run.status, "FAILED");
        assert_eq!(run.error.as_deref(), Some("[scan] boom"));
        assert!(run.finished_at.is_some());
        assert!(RunRepository::list_unfinished(&pool).await.unwrap().is_empty());
    }
}
