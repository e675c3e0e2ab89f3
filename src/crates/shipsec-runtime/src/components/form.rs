//! Form gate: park until a schema-validated form response arrives.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shipsec_core::component::{ComponentDefinition, ParamSpec, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::{Outcome, SuspensionKind, SuspensionRequest};

pub const COMPONENT_ID: &str = "human.form";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "human")
        .with_label("Form input")
        .with_input(PortSpec::new("context", PortType::Any).optional())
        .with_output(PortSpec::new("data", PortType::Json))
        .with_parameter(
            ParamSpec::new("title")
                .required()
                .with_schema(json!({"type": "string", "minLength": 1})),
        )
        .with_parameter(
            ParamSpec::new("fields")
                .required()
                .with_schema(json!({"type": "object"})),
        )
        .with_parameter(
            ParamSpec::new("timeout_seconds").with_schema(json!({"type": "number", "minimum": 1})),
        )
        .with_retry(RetryPolicy::none())
}

pub struct FormInput;

#[async_trait]
impl InlineComponent for FormInput {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let title = call
            .request
            .param("title")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::validation("parameter 'title' is required"))?;
        let fields = call
            .request
            .param("fields")
            .cloned()
            .ok_or_else(|| NodeError::validation("parameter 'fields' is required"))?;

        let mut request =
            SuspensionRequest::new(Uuid::new_v4().to_string(), SuspensionKind::Form, title)
                .with_input_schema(fields)
                .with_context(
                    call.request.input("context").cloned().unwrap_or(Value::Null),
                );
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

    #[test]
    fn test_definition_shape() {
        let def = definition();
        assert_eq!(def.outputs[0].id, "data");
        assert_eq!(def.outputs[0].port_type, PortType::Json);
        assert!(def.parameter("fields").unwrap().required);
    }
}
