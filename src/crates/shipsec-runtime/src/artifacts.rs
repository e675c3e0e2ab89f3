//! Artifact capability: byte payloads stored by reference.
//!
//! Node outputs never embed binary content; they carry an `artifactId`
//! (and, when an external object store is attached, a `fileId`). The
//! in-memory store backs tests and single-node deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shipsec_core::error::NodeError;

/// Who owns an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactScope {
    /// Owned by the producing run; garbage-collected with it.
    #[default]
    Run,
    /// Promoted to tenant-global scope.
    Global,
}

/// Reference to a stored artifact, the form that appears in node
/// outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Primary identifier.
    pub artifact_id: String,
    /// Identifier in external object storage, when one is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// Display name, e.g. `screenshot.png`.
    pub name: String,
    /// MIME type.
    pub mime: String,
    /// Ownership scope.
    pub scope: ArtifactScope,
}

/// Storage backend for artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a payload and return its handle.
    async fn upload(
        &self,
        run_id: &str,
        name: &str,
        content: Vec<u8>,
        mime: &str,
        scope: ArtifactScope,
    ) -> Result<ArtifactHandle, NodeError>;

    /// Fetch a stored artifact by id.
    async fn get(&self, artifact_id: &str) -> Result<Option<(ArtifactHandle, Vec<u8>)>, NodeError>;

    /// Handles of all artifacts owned by a run.
    async fn list_for_run(&self, run_id: &str) -> Result<Vec<ArtifactHandle>, NodeError>;
}

struct StoredArtifact {
    handle: ArtifactHandle,
    run_id: String,
    content: Vec<u8>,
}

/// In-memory artifact store.
#[derive(Default)]
pub struct MemoryArtifacts {
    artifacts: RwLock<HashMap<String, StoredArtifact>>,
}

impl MemoryArtifacts {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the store as a trait object.
    pub fn into_shared(self) -> Arc<dyn ArtifactStore> {
        Arc::new(self)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn upload(
        &self,
        run_id: &str,
        name: &str,
        content: Vec<u8>,
        mime: &str,
        scope: ArtifactScope,
    ) -> Result<ArtifactHandle, NodeError> {
        let handle = ArtifactHandle {
            artifact_id: Uuid::new_v4().to_string(),
            file_id: None,
            name: name.to_string(),
            mime: mime.to_string(),
            scope,
        };
        self.artifacts.write().insert(
            handle.artifact_id.clone(),
            StoredArtifact {
                handle: handle.clone(),
                run_id: run_id.to_string(),
                content,
            },
        );
        Ok(handle)
    }

    async fn get(&self, artifact_id: &str) -> Result<Option<(ArtifactHandle, Vec<u8>)>, NodeError> {
        Ok(self
            .artifacts
            .read()
            .get(artifact_id)
            .map(|stored| (stored.handle.clone(), stored.content.clone())))
    }

    async fn list_for_run(&self, run_id: &str) -> Result<Vec<ArtifactHandle>, NodeError> {
        let mut handles: Vec<ArtifactHandle> = self
            .artifacts
            .read()
            .values()
            .filter(|stored| stored.run_id == run_id)
            .map(|stored| stored.handle.clone())
            .collect();
        handles.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_and_get() {
        let store = MemoryArtifacts::new();
        let handle = store
            .upload("run-1", "report.txt", b"findings".to_vec(), "text/plain", ArtifactScope::Run)
            .await
            .unwrap();

        let (fetched, content) = store.get(&handle.artifact_id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "report.txt");
        assert_eq!(content, b"findings");
        assert_eq!(fetched.scope, ArtifactScope::Run);
    }

    #[tokio::test]
    async fn test_list_for_run_filters_ownership() {
        let store = MemoryArtifacts::new();
        store
            .upload("run-1", "a.txt", vec![], "text/plain", ArtifactScope::Run)
            .await
            .unwrap();
        store
            .upload("run-2", "b.txt", vec![], "text/plain", ArtifactScope::Run)
            .await
            .unwrap();

        let handles = store.list_for_run("run-1").await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].name, "a.txt");
    }

    #[tokio::test]
    async fn test_unknown_artifact_is_none() {
        let store = MemoryArtifacts::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
