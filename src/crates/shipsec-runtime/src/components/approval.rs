//! Manual approval gate with branching outputs.
//!
//! The component always parks its node with an `approval` suspension.
//! When the human decision arrives, the engine stores the payload as the
//! node's output and enables only the chosen branch (`approved` or
//! `rejected`); descendants of the other branch are skipped.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shipsec_core::component::{ComponentDefinition, ParamSpec, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::{Outcome, SuspensionKind, SuspensionRequest};

pub const COMPONENT_ID: &str = "human.approval";

/// Branch port enabled on approval.
pub const PORT_APPROVED: &str = "approved";
/// Branch port enabled on rejection.
pub const PORT_REJECTED: &str = "rejected";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "human")
        .with_label("Manual approval")
        .with_input(PortSpec::new("value", PortType::Any).optional())
        .with_output(PortSpec::new(PORT_APPROVED, PortType::Any).branching())
        .with_output(PortSpec::new(PORT_REJECTED, PortType::Any).branching())
        .with_parameter(
            ParamSpec::new("title")
                .required()
                .with_schema(json!({"type": "string", "minLength": 1})),
        )
        .with_parameter(ParamSpec::new("description").with_schema(json!({"type": "string"})))
        .with_parameter(
            ParamSpec::new("timeout_seconds").with_schema(json!({"type": "number", "minimum": 1})),
        )
        .with_retry(RetryPolicy::none())
}

pub struct ManualApproval;

#[async_trait]
impl InlineComponent for ManualApproval {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let title = call
            .request
            .param("title")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::validation("parameter 'title' is required"))?;

        let mut request = SuspensionRequest::new(
            Uuid::new_v4().to_string(),
            SuspensionKind::Approval,
            title,
        )
        .with_context(json!({
            "value": call.request.input("value").cloned().unwrap_or(Value::Null),
            "node": call.request.node_id,
        }));

        if let Some(description) = call.request.param("description").and_then(Value::as_str) {
            request = request.with_description(description);
        }
        if let Some(seconds) = call
            .request
            .param("timeout_seconds")
            .and_then(Value::as_f64)
        {
            request = request.with_timeout_at(Utc::now() + Duration::seconds(seconds as i64));
        }

        Ok(Outcome::Pending(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifacts;
    use crate::cancel::CancellationToken;
    use crate::capability::{Capabilities, CollectingLogSink};
    use crate::invoke::InvocationRequest;
    use crate::secrets::MemorySecrets;
    use shipsec_core::component::RunnerKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_pending_approval() {
        let mut params = serde_json::Map::new();
        params.insert("title".to_string(), json!("Deploy?"));
        params.insert("timeout_seconds".to_string(), json!(3600));

        let call = ComponentCall {
            request: InvocationRequest {
                component: COMPONENT_ID.to_string(),
                runner: RunnerKind::Inline,
                run_id: "run-1".to_string(),
                node_id: "gate".to_string(),
                tenant_id: "tenant-1".to_string(),
                inputs: serde_json::Map::new(),
                params,
                cancel: CancellationToken::new(),
            },
            caps: Capabilities::new(
                "tenant-1",
                "run-1",
                "gate",
                MemorySecrets::new().into_shared(),
                MemoryArtifacts::new().into_shared(),
                Arc::new(CollectingLogSink::new()),
            ),
        };

        let outcome = ManualApproval.run(call).await.unwrap();
        match outcome {
            Outcome::Pending(request) => {
                assert_eq!(request.kind, SuspensionKind::Approval);
                assert_eq!(request.title, "Deploy?");
                assert!(request.timeout_at.is_some());
            }
            other => panic!("expected pending, got {:?}", other),
        }
    }

    #[test]
    fn test_definition_declares_branching_outputs() {
        let def = definition();
        assert!(def.outputs.iter().all(|o| o.is_branching));
        assert_eq!(def.outputs.len(), 2);
    }
}
