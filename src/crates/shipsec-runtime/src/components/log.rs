//! Log step: record a message on the run's log stream and pass the
//! input through unchanged.

use async_trait::async_trait;
use serde_json::{json, Value};

use shipsec_core::component::{ComponentDefinition, ParamSpec, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::capability::LogLevel;
use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::Outcome;

pub const COMPONENT_ID: &str = "core.log";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "core")
        .with_label("Log")
        .with_input(PortSpec::new("value", PortType::Any).optional())
        .with_output(PortSpec::new("value", PortType::Any))
        .with_parameter(ParamSpec::new("message").with_schema(json!({"type": "string"})))
        .with_parameter(
            ParamSpec::new("level")
                .with_schema(json!({
                    "type": "string",
                    "enum": ["debug", "info", "warn", "error"]
                }))
                .with_default(json!("info")),
        )
        .with_retry(RetryPolicy::none())
}

pub struct LogMessage;

#[async_trait]
impl InlineComponent for LogMessage {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let value = call.request.input("value").cloned().unwrap_or(Value::Null);
        let message = match call.request.param("message").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => serde_json::to_string(&value)
                .unwrap_or_else(|_| "<unprintable value>".to_string()),
        };
        let level = match call.request.param("level").and_then(Value::as_str) {
            Some("debug") => LogLevel::Debug,
            Some("warn") => LogLevel::Warn,
            Some("error") => LogLevel::Error,
            _ => LogLevel::Info,
        };
        call.caps.log(level, message);
        Ok(Outcome::single("value", value))
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
    async fn test_logs_and_passes_through() {
        let sink = Arc::new(CollectingLogSink::new());
        let mut inputs = serde_json::Map::new();
        inputs.insert("value".to_string(), json!({"host": "10.0.0.5"}));
        let mut params = serde_json::Map::new();
        params.insert("message".to_string(), json!("host discovered"));
        params.insert("level".to_string(), json!("warn"));

        let call = ComponentCall {
            request: InvocationRequest {
                component: COMPONENT_ID.to_string(),
                runner: RunnerKind::Inline,
                run_id: "run-1".to_string(),
                node_id: "log-1".to_string(),
                tenant_id: "tenant-1".to_string(),
                inputs,
                params,
                cancel: CancellationToken::new(),
            },
            caps: Capabilities::new(
                "tenant-1",
                "run-1",
                "log-1",
                MemorySecrets::new().into_shared(),
                MemoryArtifacts::new().into_shared(),
                sink.clone(),
            ),
        };

        let outcome = LogMessage.run(call).await.unwrap();
        assert_eq!(outcome, Outcome::single("value", json!({"host": "10.0.0.5"})));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "host discovered");
        assert_eq!(events[0].level, LogLevel::Warn);
    }
}
