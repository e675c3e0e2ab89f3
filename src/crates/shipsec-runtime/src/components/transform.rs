//! Text transform: uppercase, lowercase, trim, or template expansion.

use async_trait::async_trait;
use serde_json::{json, Value};

use shipsec_core::component::{ComponentDefinition, ParamSpec, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::Outcome;

pub const COMPONENT_ID: &str = "core.transform.text";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "core")
        .with_label("Text transform")
        .with_input(PortSpec::new("value", PortType::Text))
        .with_output(PortSpec::new("value", PortType::Text))
        .with_parameter(
            ParamSpec::new("mode")
                .with_schema(json!({
                    "type": "string",
                    "enum": ["upper", "lower", "trim", "template"]
                }))
                .with_default(json!("upper")),
        )
        .with_parameter(ParamSpec::new("template").with_schema(json!({"type": "string"})))
        .with_retry(RetryPolicy::none())
}

pub struct TextTransform;

#[async_trait]
impl InlineComponent for TextTransform {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let value = call
            .request
            .text_input("value")
            .ok_or_else(|| NodeError::validation("input 'value' must be text"))?;
        let mode = call
            .request
            .param("mode")
            .and_then(Value::as_str)
            .unwrap_or("upper");

        let transformed = match mode {
            "upper" => value.to_uppercase(),
            "lower" => value.to_lowercase(),
            "trim" => value.trim().to_string(),
            "template" => {
                let template = call
                    .request
                    .param("template")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        NodeError::validation("mode 'template' requires the 'template' parameter")
                    })?;
                template.replace("{value}", value)
            }
            other => {
                return Err(NodeError::validation(format!(
                    "unknown transform mode '{}'",
                    other
                )))
            }
        };

        Ok(Outcome::single("value", json!(transformed)))
    }
}
