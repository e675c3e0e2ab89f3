//! Schedule repository.

use chrono::Utc;
use uuid::Uuid;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::ScheduleRow;

/// Database operations on schedules.
pub struct ScheduleRepository;

impl ScheduleRepository {
    /// Register a schedule.
    pub async fn create(
        pool: &DatabasePool,
        workflow_id: &str,
        cron: &str,
        inputs: &str,
    ) -> DbResult<ScheduleRow> {
        let now = Utc::now().to_rfc3339();
        let id = format!("sched-{}", Uuid::new_v4());
        let row = sqlx::query_as::<_, ScheduleRow>(
            "INSERT INTO schedules (id, workflow_id, cron, inputs, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(workflow_id)
        .bind(cron)
        .bind(inputs)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// All enabled schedules.
    pub async fn list_enabled(pool: &DatabasePool) -> DbResult<Vec<ScheduleRow>> {
        Ok(sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE enabled = 1 ORDER BY created_at",
        )
        .fetch_all(pool)
        .await?)
    }

    /// Enable or disable a schedule.
    pub async fn set_enabled(pool: &DatabasePool, id: &str, enabled: bool) -> DbResult<()> {
        sqlx::query("UPDATE schedules SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;

    #[tokio::test]
    async fn test_create_list_and_disable() {
        let pool = test_pool().await;
        let schedule = ScheduleRepository::create(&pool, "wf-1", "0 0 3 * * *", "{}")
            .await
            .unwrap();
        assert_eq!(ScheduleRepository::list_enabled(&pool).await.unwrap().len(), 1);

        ScheduleRepository::set_enabled(&pool, &schedule.id, false)
            .await
            .unwrap();
        assert!(ScheduleRepository::list_enabled(&pool).await.unwrap().is_empty());
    }
}
