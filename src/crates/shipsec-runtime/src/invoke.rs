//! Invocation request and outcome types shared by all runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use shipsec_core::component::RunnerKind;

use crate::cancel::CancellationToken;

/// Kind of external event a suspended node is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspensionKind {
    /// A human approval decision (`approved`/`rejected`).
    Approval,
    /// A structured form response validated against `input_schema`.
    Form,
    /// A wall-clock timer.
    Timer,
    /// An inbound webhook delivery.
    Webhook,
}

/// A component's request to park its node until an external event.
///
/// Returned as [`Outcome::Pending`]; the engine turns it into a durable
/// suspension record with a single-use resolution token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionRequest {
    /// Component-chosen id correlating the resolution with the request.
    pub request_id: String,
    /// What the node is waiting for.
    pub kind: SuspensionKind,
    /// Short human-readable title (e.g. "Deploy?").
    pub title: String,
    /// Longer description shown to the responder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema the resolution payload must satisfy (`form` kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Opaque context echoed back to the responder.
    #[serde(default)]
    pub context: Value,
    /// When the suspension expires with a timeout, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

impl SuspensionRequest {
    /// A request of the given kind with an empty context.
    pub fn new(request_id: impl Into<String>, kind: SuspensionKind, title: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            title: title.into(),
            description: None,
            input_schema: None,
            context: Value::Null,
            timeout_at: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach the payload schema (`form` kind).
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Attach opaque context data.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Attach an expiry instant.
    pub fn with_timeout_at(mut self, timeout_at: DateTime<Utc>) -> Self {
        self.timeout_at = Some(timeout_at);
        self
    }
}

/// Result of one node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The node produced its outputs, keyed by output port id.
    Success { outputs: JsonMap<String, Value> },
    /// The node chose a branching output; only that port's edges fire.
    Branch { port: String, value: Value },
    /// The node parked awaiting an external event.
    Pending(SuspensionRequest),
}

impl Outcome {
    /// A success with a single output port.
    pub fn single(port: impl Into<String>, value: Value) -> Self {
        let mut outputs = JsonMap::new();
        outputs.insert(port.into(), value);
        Outcome::Success { outputs }
    }
}

/// One node invocation request, uniform across runners.
#[derive(Clone)]
pub struct InvocationRequest {
    /// Component definition id.
    pub component: String,
    /// Runner resolved from the plan at compile time.
    pub runner: RunnerKind,
    /// Owning run id.
    pub run_id: String,
    /// Node id (fan-out children carry `node#index`).
    pub node_id: String,
    /// Tenant the run executes under.
    pub tenant_id: String,
    /// Materialized effective inputs, keyed by input port id.
    pub inputs: JsonMap<String, Value>,
    /// Validated parameter values.
    pub params: JsonMap<String, Value>,
    /// Cancellation signal propagated from the run.
    pub cancel: CancellationToken,
}

impl InvocationRequest {
    /// Convenience input accessor.
    pub fn input(&self, port: &str) -> Option<&Value> {
        self.inputs.get(port)
    }

    /// Convenience parameter accessor.
    pub fn param(&self, id: &str) -> Option<&Value> {
        self.params.get(id)
    }

    /// A text input, when present and textual.
    pub fn text_input(&self, port: &str) -> Option<&str> {
        self.inputs.get(port).and_then(Value::as_str)
    }
}

impl std::fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("component", &self.component)
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serde_tagging() {
        let outcome = Outcome::single("value", json!("ok"));
        let encoded = serde_json::to_value(&outcome).unwrap();
        assert_eq!(encoded["status"], "success");
        assert_eq!(encoded["outputs"]["value"], "ok");

        let branch = Outcome::Branch {
            port: "approved".to_string(),
            value: json!({"approved": true}),
        };
        let encoded = serde_json::to_value(&branch).unwrap();
        assert_eq!(encoded["status"], "branch");
    }

    #[test]
    fn test_suspension_request_builder() {
        let request = SuspensionRequest::new("req-1", SuspensionKind::Approval, "Deploy?")
            .with_description("Approve the production deploy")
            .with_context(json!({"environment": "prod"}));
        assert_eq!(request.kind, SuspensionKind::Approval);
        assert_eq!(request.context["environment"], "prod");
        assert!(request.timeout_at.is_none());
    }
}
