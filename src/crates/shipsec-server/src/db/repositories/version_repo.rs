//! Workflow version repository.
//!
//! Versions are content-addressed: committing an unchanged graph finds
//! the existing row by hash instead of inserting a duplicate.

use chrono::Utc;
use uuid::Uuid;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::WorkflowVersionRow;

/// Database operations on committed plan versions.
pub struct VersionRepository;

impl VersionRepository {
    /// Insert a new version row.
    pub async fn create(
        pool: &DatabasePool,
        workflow_id: &str,
        version: i64,
        plan: &str,
        hash: &str,
    ) -> DbResult<WorkflowVersionRow> {
        let now = Utc::now().to_rfc3339();
        let id = format!("ver-{}", Uuid::new_v4());
        let row = sqlx::query_as::<_, WorkflowVersionRow>(
            "INSERT INTO workflow_versions (id, workflow_id, version, plan, hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(workflow_id)
        .bind(version)
        .bind(plan)
        .bind(hash)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Get a version by id.
    pub async fn get(pool: &DatabasePool, id: &str) -> DbResult<Option<WorkflowVersionRow>> {
        Ok(sqlx::query_as::<_, WorkflowVersionRow>(
            "SELECT * FROM workflow_versions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?)
    }

    /// Find an existing version by content hash (idempotent commits).
    pub async fn find_by_hash(
        pool: &DatabasePool,
        workflow_id: &str,
        hash: &str,
    ) -> DbResult<Option<WorkflowVersionRow>> {
        Ok(sqlx::query_as::<_, WorkflowVersionRow>(
            "SELECT * FROM workflow_versions WHERE workflow_id = ? AND hash = ?",
        )
        .bind(workflow_id)
        .bind(hash)
        .fetch_optional(pool)
        .await?)
    }

    /// Find a workflow's version by number.
    pub async fn find_by_number(
        pool: &DatabasePool,
        workflow_id: &str,
        version: i64,
    ) -> DbResult<Option<WorkflowVersionRow>> {
        Ok(sqlx::query_as::<_, WorkflowVersionRow>(
            "SELECT * FROM workflow_versions WHERE workflow_id = ? AND version = ?",
        )
        .bind(workflow_id)
        .bind(version)
        .fetch_optional(pool)
        .await?)
    }

    /// The highest committed version number for a workflow.
    pub async fn latest_number(pool: &DatabasePool, workflow_id: &str) -> DbResult<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(version) FROM workflow_versions WHERE workflow_id = ?",
        )
        .bind(workflow_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0.unwrap_or(0))
    }
}
