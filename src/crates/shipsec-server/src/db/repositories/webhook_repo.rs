//! Webhook configuration repository.

use chrono::Utc;
use uuid::Uuid;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::WebhookRow;

/// Database operations on webhook configurations.
pub struct WebhookRepository;

impl WebhookRepository {
    /// Register a webhook under a unique ingress path.
    pub async fn create(
        pool: &DatabasePool,
        path: &str,
        workflow_id: &str,
        rules: &str,
    ) -> DbResult<WebhookRow> {
        let now = Utc::now().to_rfc3339();
        let id = format!("wh-{}", Uuid::new_v4());
        let row = sqlx::query_as::<_, WebhookRow>(
            "INSERT INTO webhooks (id, path, workflow_id, rules, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(path)
        .bind(workflow_id)
        .bind(rules)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Look a configuration up by its ingress path.
    pub async fn find_by_path(pool: &DatabasePool, path: &str) -> DbResult<Option<WebhookRow>> {
        Ok(
            sqlx::query_as::<_, WebhookRow>("SELECT * FROM webhooks WHERE path = ?")
                .bind(path)
                .fetch_optional(pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;

    #[tokio::test]
    async fn test_create_and_find_by_path() {
        let pool = test_pool().await;
        WebhookRepository::create(&pool, "github-push", "wf-1", "[]")
            .await
            .unwrap();
        let found = WebhookRepository::find_by_path(&pool, "github-push")
            .await
            .unwrap();
        assert_eq!(found.unwrap().workflow_id, "wf-1");
        assert!(WebhookRepository::find_by_path(&pool, "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_path_rejected() {
        let pool = test_pool().await;
        WebhookRepository::create(&pool, "github-push", "wf-1", "[]")
            .await
            .unwrap();
        let err = WebhookRepository::create(&pool, "github-push", "wf-2", "[]")
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }
}
