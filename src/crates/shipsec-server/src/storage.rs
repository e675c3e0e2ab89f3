//! Artifact store over the relational database.

use async_trait::async_trait;
use uuid::Uuid;

use shipsec_core::error::NodeError;
use shipsec_runtime::{ArtifactHandle, ArtifactScope, ArtifactStore};

use crate::db::repositories::ArtifactRepository;
use crate::db::DatabasePool;

/// Artifact store persisting payloads in the `artifacts` table. The
/// `file_id` column stays empty until an external object store is
/// attached.
#[derive(Clone)]
pub struct SqliteArtifacts {
    pool: DatabasePool,
}

impl SqliteArtifacts {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn scope_label(scope: ArtifactScope) -> &'static str {
    match scope {
        ArtifactScope::Run => "run",
        ArtifactScope::Global => "global",
    }
}

#[async_trait]
impl ArtifactStore for SqliteArtifacts {
    async fn upload(
        &self,
        run_id: &str,
        name: &str,
        content: Vec<u8>,
        mime: &str,
        scope: ArtifactScope,
    ) -> Result<ArtifactHandle, NodeError> {
        let id = format!("art-{}", Uuid::new_v4());
        ArtifactRepository::create(
            &self.pool,
            &id,
            run_id,
            name,
            mime,
            scope_label(scope),
            &content,
        )
        .await
        .map_err(|e| NodeError::transient(format!("store artifact: {}", e)))?;
        Ok(ArtifactHandle {
            artifact_id: id,
            file_id: None,
            name: name.to_string(),
            mime: mime.to_string(),
            scope,
        })
    }

    async fn get(&self, artifact_id: &str) -> Result<Option<(ArtifactHandle, Vec<u8>)>, NodeError> {
        let row = ArtifactRepository::get(&self.pool, artifact_id)
            .await
            .map_err(|e| NodeError::transient(format!("load artifact: {}", e)))?;
        Ok(row.map(|row| {
            let scope = if row.scope == "global" {
                ArtifactScope::Global
            } else {
                ArtifactScope::Run
            };
            (
                ArtifactHandle {
                    artifact_id: row.id,
                    file_id: row.file_id,
                    name: row.name,
                    mime: row.mime,
                    scope,
                },
                row.content,
            )
        }))
    }

    async fn list_for_run(&self, run_id: &str) -> Result<Vec<ArtifactHandle>, NodeError> {
        let rows = ArtifactRepository::list_for_run(&self.pool, run_id)
            .await
            .map_err(|e| NodeError::transient(format!("list artifacts: {}", e)))?;
        Ok(rows
            .into_iter()
            .map(|row| ArtifactHandle {
                artifact_id: row.id,
                file_id: row.file_id,
                name: row.name,
                mime: row.mime,
                scope: if row.scope == "global" {
                    ArtifactScope::Global
                } else {
                    ArtifactScope::Run
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;

    #[tokio::test]
    async fn test_upload_and_get_roundtrip() {
        let store = SqliteArtifacts::new(test_pool().await);
        let handle = store
            .upload("run-1", "report.sarif", b"{}".to_vec(), "application/json", ArtifactScope::Run)
            .await
            .unwrap();
        let (fetched, content) = store.get(&handle.artifact_id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "report.sarif");
        assert_eq!(content, b"{}");
    }
}
