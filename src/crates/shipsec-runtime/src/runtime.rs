//! The uniform `invoke(request) -> outcome` entry point.
//!
//! [`ComponentRuntime`] owns the three runner strategies and the
//! capability providers. Dispatch is a `match` over the sealed
//! [`RunnerKind`] variant resolved into the plan at compile time; there
//! is no runner inheritance hierarchy.

use std::sync::Arc;

use shipsec_core::component::RunnerKind;
use shipsec_core::error::NodeError;

use crate::artifacts::{ArtifactStore, MemoryArtifacts};
use crate::capability::{Capabilities, LogSink, TracingLogSink};
use crate::container::ContainerRunner;
use crate::inline::{invoke_inline, ComponentCall, InlineRegistry};
use crate::invoke::{InvocationRequest, Outcome};
use crate::remote::RemoteRunner;
use crate::secrets::{MemorySecrets, SecretsProvider};

/// Dispatches node invocations onto the runner each component declares.
pub struct ComponentRuntime {
    inline: InlineRegistry,
    container: Option<ContainerRunner>,
    remote: RemoteRunner,
    secrets: Arc<dyn SecretsProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    sink: Arc<dyn LogSink>,
}

impl ComponentRuntime {
    /// A runtime with in-memory providers, a tracing log sink, and no
    /// container runner. Suitable for tests and inline-only deployments.
    pub fn new(inline: InlineRegistry) -> Self {
        Self {
            inline,
            container: None,
            remote: RemoteRunner::new(),
            secrets: MemorySecrets::new().into_shared(),
            artifacts: MemoryArtifacts::new().into_shared(),
            sink: Arc::new(TracingLogSink),
        }
    }

    /// Attach a container runner.
    pub fn with_container_runner(mut self, runner: ContainerRunner) -> Self {
        self.container = Some(runner);
        self
    }

    /// Replace the secrets provider.
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Replace the artifact store.
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Replace the log sink.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The artifact store, shared with the API layer.
    pub fn artifacts(&self) -> Arc<dyn ArtifactStore> {
        self.artifacts.clone()
    }

    /// Capabilities scoped to one invocation.
    pub fn capabilities(&self, request: &InvocationRequest) -> Capabilities {
        Capabilities::new(
            request.tenant_id.clone(),
            request.run_id.clone(),
            request.node_id.clone(),
            self.secrets.clone(),
            self.artifacts.clone(),
            self.sink.clone(),
        )
    }

    /// Invoke one node on its declared runner.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<Outcome, NodeError> {
        let caps = self.capabilities(&request);
        match request.runner.clone() {
            RunnerKind::Inline => {
                let component = self.inline.get(&request.component).ok_or_else(|| {
                    NodeError::configuration(format!(
                        "no inline implementation registered for '{}'",
                        request.component
                    ))
                })?;
                invoke_inline(component, ComponentCall { request, caps }).await
            }
            RunnerKind::Container(spec) => {
                let runner = self.container.as_ref().ok_or_else(|| {
                    NodeError::configuration("container runner is not enabled on this engine")
                })?;
                runner.invoke(&spec, &request, &caps).await
            }
            RunnerKind::Remote(spec) => self.remote.invoke(&spec, &request, &caps).await,
        }
    }
}

impl std::fmt::Debug for ComponentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRuntime")
            .field("inline", &self.inline)
            .field("container_enabled", &self.container.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::inline::InlineComponent;
    use async_trait::async_trait;
    use serde_json::json;
    use shipsec_core::component::ContainerSpec;
    use shipsec_core::error::ErrorKind;

    struct Echo;

    #[async_trait]
    impl InlineComponent for Echo {
        async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
            Ok(Outcome::single(
                "value",
                call.request.input("value").cloned().unwrap_or(json!(null)),
            ))
        }
    }

    fn request(component: &str, runner: RunnerKind) -> InvocationRequest {
        let mut inputs = serde_json::Map::new();
        inputs.insert("value".to_string(), json!("ping"));
        InvocationRequest {
            component: component.to_string(),
            runner,
            run_id: "run-1".to_string(),
            node_id: "n1".to_string(),
            tenant_id: "tenant-1".to_string(),
            inputs,
            params: serde_json::Map::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_inline_dispatch() {
        let mut inline = InlineRegistry::new();
        inline.register("test.echo", Arc::new(Echo)).unwrap();
        let runtime = ComponentRuntime::new(inline);

        let outcome = runtime
            .invoke(request("test.echo", RunnerKind::Inline))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::single("value", json!("ping")));
    }

    #[tokio::test]
    async fn test_unregistered_inline_is_configuration_error() {
        let runtime = ComponentRuntime::new(InlineRegistry::new());
        let err = runtime
            .invoke(request("test.ghost", RunnerKind::Inline))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_container_without_runner_is_configuration_error() {
        let runtime = ComponentRuntime::new(InlineRegistry::new());
        let err = runtime
            .invoke(request(
                "scan.nuclei",
                RunnerKind::Container(ContainerSpec::new("ghcr.io/shipsec/nuclei")),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("not enabled"));
    }
}
