//! Workflow entry point with user-defined runtime inputs.
//!
//! The `runtime_inputs` parameter declares the fields a trigger must
//! supply; the `resolve_ports` hook turns each declared field into an
//! output port, which is how entry points power manual runs, API runs,
//! and webhook ingress alike. The engine seeds the invocation's inputs
//! from the trigger's runtime inputs and the component mirrors them onto
//! its output ports.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use shipsec_core::component::{
    ComponentDefinition, ParamSpec, PortSpec, ResolvedPorts, RetryPolicy,
};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::Outcome;

pub const COMPONENT_ID: &str = "core.entry";

/// Definition with the dynamic-output hook.
pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "core")
        .with_label("Entry point")
        .with_output(PortSpec::new("started", PortType::Boolean))
        .with_parameter(ParamSpec::new("runtime_inputs").with_schema(json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": {"type": "string", "minLength": 1},
                    "type": {"type": "string"},
                    "label": {"type": "string"},
                    "required": {"type": "boolean"}
                }
            }
        })))
        .with_retry(RetryPolicy::none())
        .with_resolve_ports(resolve_ports_hook())
}

fn resolve_ports_hook() -> shipsec_core::component::ResolvePortsFn {
    Arc::new(|params| {
        let mut ports = ResolvedPorts::default();
        let Some(fields) = params.get("runtime_inputs").and_then(Value::as_array) else {
            return Ok(ports);
        };
        for field in fields {
            let id = field
                .get("id")
                .and_then(Value::as_str)
                .ok_or("runtime input declaration missing 'id'")?;
            let port_type = field
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("text")
                .parse::<PortType>()
                .map_err(|e| format!("runtime input '{}': {}", id, e))?;
            let mut spec = PortSpec::new(id, port_type);
            if let Some(label) = field.get("label").and_then(Value::as_str) {
                spec = spec.with_label(label);
            }
            if !field.get("required").and_then(Value::as_bool).unwrap_or(true) {
                spec = spec.optional();
            }
            ports.outputs.push(spec);
        }
        Ok(ports)
    })
}

/// Inline implementation: mirror the seeded runtime inputs onto the
/// declared output ports.
pub struct Entry;

#[async_trait]
impl InlineComponent for Entry {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let mut outputs = call.request.inputs.clone();
        outputs.insert("started".to_string(), json!(true));
        Ok(Outcome::Success { outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsec_core::component::ComponentRegistry;

    #[test]
    fn test_runtime_inputs_become_outputs() {
        let mut registry = ComponentRegistry::new();
        registry.register(definition()).unwrap();
        let def = registry.get(COMPONENT_ID).unwrap();

        let mut params = serde_json::Map::new();
        params.insert(
            "runtime_inputs".to_string(),
            json!([
                {"id": "repo_name", "type": "text"},
                {"id": "targets", "type": "list<text>", "required": false}
            ]),
        );

        let ports = registry.resolve_ports(&def, &params).unwrap();
        assert_eq!(ports.outputs.len(), 3);
        assert_eq!(ports.outputs[1].id, "repo_name");
        assert!(ports.outputs[1].required);
        assert!(!ports.outputs[2].required);
    }

    #[test]
    fn test_declaration_without_id_rejected() {
        let registry = ComponentRegistry::new();
        let def = definition();
        let mut params = serde_json::Map::new();
        params.insert("runtime_inputs".to_string(), json!([{"type": "text"}]));
        assert!(registry.resolve_ports(&def, &params).is_err());
    }
}
