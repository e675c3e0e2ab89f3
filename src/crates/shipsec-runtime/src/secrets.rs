//! Secrets capability: provider trait, redacting value wrapper, and the
//! in-memory provider.
//!
//! Secret plaintext crosses exactly one boundary: `secrets.get()` inside
//! a component invocation. [`SecretValue`] refuses to serialize and
//! redacts itself in debug output, so plaintext never lands in logs,
//! checkpoints, or node outputs by accident.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use shipsec_core::error::NodeError;

/// A secret's plaintext plus its version counter.
#[derive(Clone)]
pub struct SecretValue {
    plaintext: String,
    version: u32,
}

impl SecretValue {
    /// Wrap a plaintext at the given version.
    pub fn new(plaintext: impl Into<String>, version: u32) -> Self {
        Self {
            plaintext: plaintext.into(),
            version,
        }
    }

    /// Access the plaintext. The call site is the audit point.
    pub fn expose(&self) -> &str {
        &self.plaintext
    }

    /// The secret's version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue {{ version: {}, plaintext: <redacted> }}", self.version)
    }
}

/// Provider of secrets to component invocations.
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    /// Fetch a secret's plaintext and version. A missing secret is a
    /// configuration error (non-retryable).
    async fn get(&self, id: &str) -> Result<SecretValue, NodeError>;

    /// Ids of all secrets visible to the tenant, sorted.
    async fn list(&self) -> Result<Vec<String>, NodeError>;
}

/// In-memory provider for tests and single-node deployments.
#[derive(Default)]
pub struct MemorySecrets {
    secrets: RwLock<HashMap<String, SecretValue>>,
}

impl MemorySecrets {
    /// An empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a secret, bumping its version.
    pub fn put(&self, id: impl Into<String>, plaintext: impl Into<String>) {
        let id = id.into();
        let mut secrets = self.secrets.write();
        let version = secrets.get(&id).map(|s| s.version + 1).unwrap_or(1);
        secrets.insert(id, SecretValue::new(plaintext, version));
    }

    /// Builder-style insertion for test setup.
    pub fn with_secret(self, id: impl Into<String>, plaintext: impl Into<String>) -> Self {
        self.put(id, plaintext);
        self
    }

    /// Share the provider as a trait object.
    pub fn into_shared(self) -> Arc<dyn SecretsProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl SecretsProvider for MemorySecrets {
    async fn get(&self, id: &str) -> Result<SecretValue, NodeError> {
        self.secrets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| NodeError::configuration(format!("secret '{}' is not configured", id)))
    }

    async fn list(&self) -> Result<Vec<String>, NodeError> {
        let mut ids: Vec<String> = self.secrets.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsec_core::error::ErrorKind;

    #[tokio::test]
    async fn test_get_and_versioning() {
        let secrets = MemorySecrets::new();
        secrets.put("shodan_api_key", "first");
        secrets.put("shodan_api_key", "second");

        let value = secrets.get("shodan_api_key").await.unwrap();
        assert_eq!(value.expose(), "second");
        assert_eq!(value.version(), 2);
    }

    #[tokio::test]
    async fn test_missing_secret_is_configuration_error() {
        let secrets = MemorySecrets::new();
        let err = secrets.get("absent").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let secrets = MemorySecrets::new()
            .with_secret("b", "2")
            .with_secret("a", "1");
        assert_eq!(secrets.list().await.unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_debug_redacts_plaintext() {
        let value = SecretValue::new("hunter2", 1);
        let rendered = format!("{:?}", value);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }
}
