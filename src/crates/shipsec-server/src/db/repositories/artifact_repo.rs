//! Artifact repository: payloads stored by reference in the relational
//! store (the object-store `file_id` column is populated when external
//! storage is attached).

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;

/// A stored artifact row with its payload.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ArtifactRow {
    pub id: String,
    pub run_id: String,
    pub name: String,
    pub mime: String,
    pub scope: String,
    pub file_id: Option<String>,
    pub content: Vec<u8>,
    pub created_at: String,
}

/// Database operations on artifacts.
pub struct ArtifactRepository;

impl ArtifactRepository {
    /// Store an artifact payload.
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        run_id: &str,
        name: &str,
        mime: &str,
        scope: &str,
        content: &[u8],
    ) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO artifacts (id, run_id, name, mime, scope, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(run_id)
        .bind(name)
        .bind(mime)
        .bind(scope)
        .bind(content)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Fetch an artifact with its payload.
    pub async fn get(pool: &DatabasePool, id: &str) -> DbResult<Option<ArtifactRow>> {
        Ok(
            sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?,
        )
    }

    /// Artifacts owned by a run.
    pub async fn list_for_run(pool: &DatabasePool, run_id: &str) -> DbResult<Vec<ArtifactRow>> {
        Ok(sqlx::query_as::<_, ArtifactRow>(
            "SELECT * FROM artifacts WHERE run_id = ? ORDER BY created_at",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;

    #[tokio::test]
    async fn test_store_and_fetch() {
        let pool = test_pool().await;
        ArtifactRepository::create(
            &pool,
            "art-1",
            "run-1",
            "screenshot.png",
            "image/png",
            "run",
            b"\x89PNG",
        )
        .await
        .unwrap();

        let artifact = ArtifactRepository::get(&pool, "art-1").await.unwrap().unwrap();
        assert_eq!(artifact.name, "screenshot.png");
        assert_eq!(artifact.content, b"\x89PNG");
        assert_eq!(
            ArtifactRepository::list_for_run(&pool, "run-1").await.unwrap().len(),
            1
        );
    }
}
