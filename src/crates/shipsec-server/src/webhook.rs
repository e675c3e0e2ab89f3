//! Webhook ingress: mapping rules and runtime-input validation.
//!
//! A webhook configuration carries a table of [`MappingRule`]s instead
//! of a script: each rule extracts a value from the request (JSON
//! pointer into the payload, or a header) and writes it to one runtime
//! input field. Rules are pure data, so every inbound delivery
//! evaluates against a fresh context and nothing leaks between
//! invocations.
//!
//! The mapped object is validated against the workflow's runtime-input
//! schema (derived from the entry node's resolved outputs) before a run
//! starts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value};

use shipsec_core::plan::ExecutionPlan;
use shipsec_core::port::PortType;

/// Where a mapped value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingSource {
    /// JSON pointer into the request payload, e.g.
    /// `/repository/full_name`.
    Payload { pointer: String },
    /// A request header by (case-insensitive) name.
    Header { name: String },
    /// A fixed value.
    Literal { value: Value },
}

/// One field-mapping rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    /// Runtime input field the value lands in.
    pub target: String,
    /// Extraction source.
    pub source: MappingSource,
    /// When present, the rule produces `"true"`/`"false"` depending on
    /// whether the extracted value equals this string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
}

/// Errors evaluating an inbound delivery.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("mapping for '{target}' found no value")]
    MissingValue { target: String },

    #[error("mapped inputs rejected: {0}")]
    SchemaViolation(String),

    #[error("workflow has no entry node with runtime inputs")]
    NoRuntimeInputs,
}

/// Evaluate the rule table against one inbound request.
pub fn evaluate_rules(
    rules: &[MappingRule],
    payload: &Value,
    headers: &HashMap<String, String>,
) -> Result<JsonMap<String, Value>, WebhookError> {
    let mut mapped = JsonMap::new();
    for rule in rules {
        let extracted = match &rule.source {
            MappingSource::Payload { pointer } => payload.pointer(pointer).cloned(),
            MappingSource::Header { name } => headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| Value::String(v.clone())),
            MappingSource::Literal { value } => Some(value.clone()),
        };

        let value = match (&rule.equals, extracted) {
            (Some(expected), found) => {
                let matches = found
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(|s| s == expected)
                    .unwrap_or(false);
                Value::String(matches.to_string())
            }
            (None, Some(found)) => found,
            (None, None) => {
                return Err(WebhookError::MissingValue {
                    target: rule.target.clone(),
                })
            }
        };
        mapped.insert(rule.target.clone(), value);
    }
    Ok(mapped)
}

/// Derive the runtime-input JSON Schema from the plan's entry nodes:
/// every non-`started` entry output becomes a property, required when
/// the port is required.
pub fn runtime_input_schema(plan: &ExecutionPlan) -> Value {
    let mut properties = JsonMap::new();
    let mut required = Vec::new();
    for &entry in &plan.entry {
        for port in &plan.nodes[entry].outputs {
            if port.id == "started" {
                continue;
            }
            properties.insert(port.id.clone(), schema_for_type(&port.port_type));
            if port.required {
                required.push(Value::String(port.id.clone()));
            }
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn schema_for_type(port_type: &PortType) -> Value {
    match port_type {
        PortType::Text | PortType::Secret => json!({"type": "string"}),
        PortType::Number => json!({"type": "number"}),
        PortType::Boolean => json!({"type": "boolean"}),
        PortType::List(inner) => json!({"type": "array", "items": schema_for_type(inner)}),
        PortType::Map => json!({"type": "object", "additionalProperties": {"type": "string"}}),
        PortType::File | PortType::Json | PortType::Any | PortType::Contract(_) => json!({}),
    }
}

/// Validate mapped inputs against the derived schema.
pub fn validate_inputs(schema: &Value, inputs: &JsonMap<String, Value>) -> Result<(), WebhookError> {
    let validator = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| WebhookError::SchemaViolation(e.to_string()))?;
    let value = Value::Object(inputs.clone());
    if let Err(errors) = validator.validate(&value) {
        let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(WebhookError::SchemaViolation(detail.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_rules() -> Vec<MappingRule> {
        vec![
            MappingRule {
                target: "repo_name".to_string(),
                source: MappingSource::Payload {
                    pointer: "/repository/full_name".to_string(),
                },
                equals: None,
            },
            MappingRule {
                target: "is_push".to_string(),
                source: MappingSource::Header {
                    name: "x-github-event".to_string(),
                },
                equals: Some("push".to_string()),
            },
        ]
    }

    #[test]
    fn test_evaluate_github_push() {
        let payload = json!({"repository": {"full_name": "org/repo"}});
        let mut headers = HashMap::new();
        headers.insert("X-GitHub-Event".to_string(), "push".to_string());

        let mapped = evaluate_rules(&github_rules(), &payload, &headers).unwrap();
        assert_eq!(mapped["repo_name"], "org/repo");
        assert_eq!(mapped["is_push"], "true");
    }

    #[test]
    fn test_equals_mismatch_yields_false() {
        let payload = json!({"repository": {"full_name": "org/repo"}});
        let mut headers = HashMap::new();
        headers.insert("x-github-event".to_string(), "issues".to_string());

        let mapped = evaluate_rules(&github_rules(), &payload, &headers).unwrap();
        assert_eq!(mapped["is_push"], "false");
    }

    #[test]
    fn test_missing_payload_value_is_error() {
        let payload = json!({"other": true});
        let headers = HashMap::new();
        let err = evaluate_rules(&github_rules()[..1], &payload, &headers).unwrap_err();
        assert!(matches!(err, WebhookError::MissingValue { .. }));
    }

    #[test]
    fn test_validate_inputs_against_schema() {
        let schema = json!({
            "type": "object",
            "properties": {"repo_name": {"type": "string"}},
            "required": ["repo_name"],
        });
        let mut ok = JsonMap::new();
        ok.insert("repo_name".to_string(), json!("org/repo"));
        assert!(validate_inputs(&schema, &ok).is_ok());

        let empty = JsonMap::new();
        assert!(matches!(
            validate_inputs(&schema, &empty),
            Err(WebhookError::SchemaViolation(_))
        ));
    }
}
