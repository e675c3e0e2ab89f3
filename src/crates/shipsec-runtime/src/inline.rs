//! Inline runner: components executed in the engine's address space.
//!
//! Inline components are the lightweight tier: transforms, AI-provider
//! glue, secret shaping, form and approval gates. Implementations are
//! registered by component id in an [`InlineRegistry`] at process start.
//! Panics inside a component are captured through the task join error and
//! surfaced as internal failures instead of taking the worker down.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use shipsec_core::error::{ErrorKind, NodeError, RegistryError};

use crate::capability::Capabilities;
use crate::invoke::{InvocationRequest, Outcome};

/// The request plus its capabilities, owned so the invocation can run on
/// its own task.
#[derive(Clone)]
pub struct ComponentCall {
    pub request: InvocationRequest,
    pub caps: Capabilities,
}

/// An inline component implementation.
#[async_trait]
pub trait InlineComponent: Send + Sync {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError>;
}

/// Catalog of inline implementations, keyed by component id.
///
/// Populated alongside the component registry at startup and read-only
/// afterwards.
#[derive(Default)]
pub struct InlineRegistry {
    components: HashMap<String, Arc<dyn InlineComponent>>,
}

impl InlineRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation. Later registrations of the same id
    /// are rejected to match the component registry's semantics.
    pub fn register(
        &mut self,
        component_id: impl Into<String>,
        component: Arc<dyn InlineComponent>,
    ) -> Result<(), RegistryError> {
        let id = component_id.into();
        if self.components.contains_key(&id) {
            return Err(RegistryError::DuplicateComponent(id));
        }
        self.components.insert(id, component);
        Ok(())
    }

    /// Look up an implementation.
    pub fn get(&self, component_id: &str) -> Option<Arc<dyn InlineComponent>> {
        self.components.get(component_id).cloned()
    }
}

impl std::fmt::Debug for InlineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.components.keys().collect();
        ids.sort();
        f.debug_struct("InlineRegistry").field("components", &ids).finish()
    }
}

/// Run an inline component on its own task, converting panics and
/// cancellation into typed failures.
pub async fn invoke_inline(
    component: Arc<dyn InlineComponent>,
    call: ComponentCall,
) -> Result<Outcome, NodeError> {
    let cancel = call.request.cancel.clone();
    let node_id = call.request.node_id.clone();
    let handle = tokio::spawn(async move { component.run(call).await });
    let abort = handle.abort_handle();

    tokio::select! {
        result = handle => match result {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => Err(NodeError::internal(format!(
                "component panicked in node '{}'",
                node_id
            ))),
            Err(_) => Err(NodeError::new(ErrorKind::Cancelled, "invocation task aborted")),
        },
        _ = cancel.cancelled() => {
            abort.abort();
            Err(cancel.cancellation_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifacts;
    use crate::capability::CollectingLogSink;
    use crate::cancel::CancellationToken;
    use crate::secrets::MemorySecrets;
    use serde_json::json;
    use shipsec_core::component::RunnerKind;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl InlineComponent for Echo {
        async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
            let value = call.request.input("value").cloned().unwrap_or(json!(null));
            Ok(Outcome::single("value", value))
        }
    }

    struct Panics;

    #[async_trait]
    impl InlineComponent for Panics {
        async fn run(&self, _call: ComponentCall) -> Result<Outcome, NodeError> {
            panic!("boom");
        }
    }

    struct Sleeper;

    #[async_trait]
    impl InlineComponent for Sleeper {
        async fn run(&self, _call: ComponentCall) -> Result<Outcome, NodeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Outcome::single("value", json!("late")))
        }
    }

    fn test_call(cancel: CancellationToken) -> ComponentCall {
        let mut inputs = serde_json::Map::new();
        inputs.insert("value".to_string(), json!("hello"));
        ComponentCall {
            request: InvocationRequest {
                component: "test.echo".to_string(),
                runner: RunnerKind::Inline,
                run_id: "run-1".to_string(),
                node_id: "echo".to_string(),
                tenant_id: "tenant-1".to_string(),
                inputs,
                params: serde_json::Map::new(),
                cancel,
            },
            caps: Capabilities::new(
                "tenant-1",
                "run-1",
                "echo",
                MemorySecrets::new().into_shared(),
                MemoryArtifacts::new().into_shared(),
                Arc::new(CollectingLogSink::new()),
            ),
        }
    }

    #[tokio::test]
    async fn test_invoke_inline_success() {
        let outcome = invoke_inline(Arc::new(Echo), test_call(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::single("value", json!("hello")));
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let err = invoke_inline(Arc::new(Panics), test_call(CancellationToken::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.message.contains("panicked"));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_invocation() {
        let cancel = CancellationToken::new();
        let call = test_call(cancel.clone());
        let task = tokio::spawn(invoke_inline(Arc::new(Sleeper), call));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = InlineRegistry::new();
        registry.register("test.echo", Arc::new(Echo)).unwrap();
        assert!(registry.register("test.echo", Arc::new(Echo)).is_err());
        assert!(registry.get("test.echo").is_some());
        assert!(registry.get("missing").is_none());
    }
}
