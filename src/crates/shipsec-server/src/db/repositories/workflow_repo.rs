//! Workflow repository.

use chrono::Utc;
use uuid::Uuid;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::WorkflowRow;

/// Database operations on workflows.
pub struct WorkflowRepository;

impl WorkflowRepository {
    /// Create a workflow with an empty (or provided) authoring draft.
    pub async fn create(
        pool: &DatabasePool,
        name: &str,
        description: Option<&str>,
        draft_graph: &str,
    ) -> DbResult<WorkflowRow> {
        let now = Utc::now().to_rfc3339();
        let id = format!("wf-{}", Uuid::new_v4());
        let row = sqlx::query_as::<_, WorkflowRow>(
            "INSERT INTO workflows (id, name, description, draft_graph, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(draft_graph)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Get a workflow by id.
    pub async fn get(pool: &DatabasePool, id: &str) -> DbResult<Option<WorkflowRow>> {
        Ok(
            sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?,
        )
    }

    /// List all workflows, newest first.
    pub async fn list(pool: &DatabasePool) -> DbResult<Vec<WorkflowRow>> {
        Ok(sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM workflows ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await?)
    }

    /// Replace the authoring draft.
    pub async fn update_draft(pool: &DatabasePool, id: &str, draft_graph: &str) -> DbResult<bool> {
        let now = Utc::now().to_rfc3339();
        let result =
            sqlx::query("UPDATE workflows SET draft_graph = ?, updated_at = ? WHERE id = ?")
                .bind(draft_graph)
                .bind(&now)
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Advance the current-version pointer after a commit.
    pub async fn set_current_version(
        pool: &DatabasePool,
        id: &str,
        version_id: &str,
    ) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE workflows SET current_version_id = ?, updated_at = ? WHERE id = ?")
            .bind(version_id)
            .bind(&now)
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
    async fn test_create_and_get() {
        let pool = test_pool().await;
        let workflow =
            WorkflowRepository::create(&pool, "Recon pipeline", Some("nightly"), "{}")
                .await
                .unwrap();
        assert!(workflow.id.starts_with("wf-"));
        assert!(workflow.current_version_id.is_none());

        let fetched = WorkflowRepository::get(&pool, &workflow.id).await.unwrap();
        assert_eq!(fetched.unwrap().name, "Recon pipeline");
    }

    #[tokio::test]
    async fn test_update_draft_and_pointer() {
        let pool = test_pool().await;
        let workflow = WorkflowRepository::create(&pool, "wf", None, "{}")
            .await
            .unwrap();

        assert!(
            WorkflowRepository::update_draft(&pool, &workflow.id, r#"{"nodes":[]}"#)
                .await
                .unwrap()
        );
        assert!(!WorkflowRepository::update_draft(&pool, "missing", "{}")
            .await
            .unwrap());

        WorkflowRepository::set_current_version(&pool, &workflow.id, "ver-1")
            .await
            .unwrap();
        let fetched = WorkflowRepository::get(&pool, &workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.current_version_id.as_deref(), Some("ver-1"));
        assert_eq!(fetched.draft_graph, r#"{"nodes":[]}"#);
    }
}
