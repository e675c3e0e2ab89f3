//! Port type system: primitives, named contracts, and compatibility rules
//!
//! Every node input and output carries a [`PortType`]. The compiler checks
//! each edge with [`compatibility`], and the engine applies the matching
//! runtime conversion with [`coerce`] when a declared asymmetric coercion
//! was used at compile time.
//!
//! # Port types
//!
//! - **Primitives**: `any`, `text`, `secret`, `number`, `boolean`, `file`,
//!   `json`.
//! - **Named contracts**: a string key (e.g. `llm.provider.v1`) bound at
//!   registration time to a JSON Schema in the [`ContractRegistry`].
//!   Contracts are versioned by name.
//! - **`list<T>`** where `T` is a primitive or contract.
//! - **`map`**: string keys to primitive values.
//!
//! # Compatibility
//!
//! Compatibility from a source port `S` to a target port `T` is:
//!
//! - identical kinds (and identical contract names) — direct;
//! - `any` on either side — direct;
//! - a declared asymmetric coercion (`text ← file`, `json ← text`,
//!   `number ← text`, `boolean ← text`, `text ← number | boolean | json`) —
//!   coercing;
//! - lists covariant on their element type;
//! - `list<T>` feeding a scalar `T` input — **fan-out**: the engine spawns
//!   one child invocation per element.
//!
//! Compile-time checks consult only the declared `from` sets; the runtime
//! conversion itself is the pure [`coerce`] function.
//!
//! # Examples
//!
//! ```rust
//! use shipsec_core::port::{compatibility, Compatibility, PortType};
//!
//! let src = PortType::List(Box::new(PortType::Text));
//! assert_eq!(compatibility(&src, &PortType::Text), Compatibility::FanOut);
//! assert_eq!(
//!     compatibility(&PortType::Text, &PortType::Number),
//!     Compatibility::Coerce,
//! );
//! assert_eq!(src.to_string(), "list<text>");
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ErrorKind, NodeError, RegistryError};

/// The type of a node input or output port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortType {
    /// Matches any value on either side of an edge.
    Any,
    /// UTF-8 text.
    Text,
    /// Sensitive text; never logged or embedded in checkpoints.
    Secret,
    /// Floating point or integer number.
    Number,
    /// Boolean.
    Boolean,
    /// A file value: inline `{name, content}` or an artifact reference.
    File,
    /// Arbitrary JSON.
    Json,
    /// A named, versioned contract bound to a schema at registration time.
    Contract(String),
    /// Homogeneous list of a primitive or contract element type.
    List(Box<PortType>),
    /// String-keyed map of primitive values.
    Map,
}

impl PortType {
    /// Shorthand for `list<inner>`.
    pub fn list(inner: PortType) -> Self {
        PortType::List(Box::new(inner))
    }

    /// Shorthand for a named contract.
    pub fn contract(name: impl Into<String>) -> Self {
        PortType::Contract(name.into())
    }

    /// Stable human label for this type (same as `Display`).
    pub fn describe(&self) -> String {
        self.to_string()
    }

    /// Structural equality. Contracts compare by name.
    pub fn equals(a: &PortType, b: &PortType) -> bool {
        a == b
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::Any => f.write_str("any"),
            PortType::Text => f.write_str("text"),
            PortType::Secret => f.write_str("secret"),
            PortType::Number => f.write_str("number"),
            PortType::Boolean => f.write_str("boolean"),
            PortType::File => f.write_str("file"),
            PortType::Json => f.write_str("json"),
            PortType::Contract(name) => write!(f, "contract<{}>", name),
            PortType::List(inner) => write!(f, "list<{}>", inner),
            PortType::Map => f.write_str("map"),
        }
    }
}

impl FromStr for PortType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "any" => return Ok(PortType::Any),
            "text" => return Ok(PortType::Text),
            "secret" => return Ok(PortType::Secret),
            "number" => return Ok(PortType::Number),
            "boolean" => return Ok(PortType::Boolean),
            "file" => return Ok(PortType::File),
            "json" => return Ok(PortType::Json),
            "map" => return Ok(PortType::Map),
            _ => {}
        }
        if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            return Ok(PortType::List(Box::new(inner.parse()?)));
        }
        if let Some(name) = s.strip_prefix("contract<").and_then(|r| r.strip_suffix('>')) {
            if name.is_empty() {
                return Err("contract name must not be empty".to_string());
            }
            return Ok(PortType::Contract(name.to_string()));
        }
        Err(format!("unknown port type '{}'", s))
    }
}

// Port types serialize as their display form so plans stay readable and
// the content hash is stable.
impl Serialize for PortType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PortType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which side wins when an input has both an inbound edge and a manually
/// supplied value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ValuePriority {
    /// A delivered edge value wins; the manual value is a fallback.
    #[default]
    ConnectionFirst,
    /// The manual value overrides an inbound edge.
    ManualFirst,
}

/// Result of the compile-time compatibility check for one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Values flow through unchanged.
    Direct,
    /// Values flow through the declared coercion at runtime.
    Coerce,
    /// The source list fans out into one child invocation per element.
    FanOut,
    /// The edge is invalid.
    Incompatible,
}

impl Compatibility {
    /// Whether the edge is allowed at all.
    pub fn is_compatible(&self) -> bool {
        !matches!(self, Compatibility::Incompatible)
    }
}

/// Declared asymmetric coercions: for a target kind, the source kinds it
/// accepts. Consulted at compile time; [`coerce`] is the runtime half.
fn coercion_accepts(target: &PortType, source: &PortType) -> bool {
    matches!(
        (target, source),
        (PortType::Text, PortType::File)
            | (PortType::Text, PortType::Number)
            | (PortType::Text, PortType::Boolean)
            | (PortType::Text, PortType::Json)
            | (PortType::Json, PortType::Text)
            | (PortType::Number, PortType::Text)
            | (PortType::Boolean, PortType::Text)
    )
}

/// Check whether a value of type `src` may be delivered to an input of
/// type `dst`, and how.
pub fn compatibility(src: &PortType, dst: &PortType) -> Compatibility {
    if src == dst {
        return Compatibility::Direct;
    }
    if matches!(src, PortType::Any) || matches!(dst, PortType::Any) {
        return Compatibility::Direct;
    }
    if coercion_accepts(dst, src) {
        return Compatibility::Coerce;
    }
    match (src, dst) {
        // Lists are covariant on the element type.
        (PortType::List(s), PortType::List(d)) => match compatibility(s, d) {
            Compatibility::Direct => Compatibility::Direct,
            Compatibility::Coerce => Compatibility::Coerce,
            _ => Compatibility::Incompatible,
        },
        // A list feeding a scalar input fans out element-wise.
        (PortType::List(s), d) => match compatibility(s, d) {
            Compatibility::Direct | Compatibility::Coerce => Compatibility::FanOut,
            _ => Compatibility::Incompatible,
        },
        _ => Compatibility::Incompatible,
    }
}

/// Pure runtime conversion for a declared coercion.
///
/// Only lexical conversions happen here. `file -> text` reads the inline
/// `content` field of a file value; reference-only file values (artifact
/// ids without inline content) fail with a configuration error, and the
/// engine is expected to materialize content before coercing.
pub fn coerce(value: &Value, from: &PortType, to: &PortType) -> Result<Value, NodeError> {
    if from == to || matches!(to, PortType::Any) || matches!(from, PortType::Any) {
        return Ok(value.clone());
    }
    match (from, to) {
        (PortType::List(f), PortType::List(t)) => {
            let items = value.as_array().ok_or_else(|| {
                NodeError::validation(format!("expected a list, got {}", type_name(value)))
            })?;
            let coerced: Result<Vec<Value>, NodeError> =
                items.iter().map(|v| coerce(v, f, t)).collect();
            Ok(Value::Array(coerced?))
        }
        (PortType::File, PortType::Text) => match value.get("content").and_then(Value::as_str) {
            Some(content) => Ok(Value::String(content.to_string())),
            None => Err(NodeError::configuration(
                "file value has no inline content to read as text",
            )),
        },
        (PortType::Number, PortType::Text) => {
            let n = value.as_f64().ok_or_else(|| {
                NodeError::validation(format!("expected a number, got {}", type_name(value)))
            })?;
            // Render integers without a trailing ".0".
            if n.fract() == 0.0 && n.abs() < 9e15 {
                Ok(Value::String(format!("{}", n as i64)))
            } else {
                Ok(Value::String(n.to_string()))
            }
        }
        (PortType::Boolean, PortType::Text) => {
            let b = value.as_bool().ok_or_else(|| {
                NodeError::validation(format!("expected a boolean, got {}", type_name(value)))
            })?;
            Ok(Value::String(b.to_string()))
        }
        (PortType::Json, PortType::Text) => Ok(Value::String(
            serde_json::to_string(value)
                .map_err(|e| NodeError::internal(format!("serialize json: {}", e)))?,
        )),
        (PortType::Text, PortType::Json) => {
            let s = value.as_str().ok_or_else(|| {
                NodeError::validation(format!("expected text, got {}", type_name(value)))
            })?;
            serde_json::from_str(s)
                .map_err(|e| NodeError::validation(format!("text is not valid JSON: {}", e)))
        }
        (PortType::Text, PortType::Number) => {
            let s = value.as_str().ok_or_else(|| {
                NodeError::validation(format!("expected text, got {}", type_name(value)))
            })?;
            let n: f64 = s
                .trim()
                .parse()
                .map_err(|_| NodeError::validation(format!("'{}' is not a number", s)))?;
            Ok(serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        (PortType::Text, PortType::Boolean) => {
            let s = value.as_str().ok_or_else(|| {
                NodeError::validation(format!("expected text, got {}", type_name(value)))
            })?;
            match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                other => Err(NodeError::validation(format!(
                    "'{}' is not a boolean",
                    other
                ))),
            }
        }
        (from, to) => Err(NodeError::new(
            ErrorKind::Internal,
            format!("no declared coercion from {} to {}", from, to),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// A named contract schema compiled for validation.
struct CompiledContract {
    schema: Value,
    validator: jsonschema::JSONSchema,
}

/// Registry of named, versioned value contracts.
///
/// Contracts are registered once at process start and are read-only
/// afterwards; tests build fresh instances instead of mutating a
/// singleton.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, Arc<CompiledContract>>,
}

impl ContractRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract under `name`. Rejects duplicates and schemas
    /// that fail to compile.
    pub fn register(&mut self, name: impl Into<String>, schema: Value) -> Result<(), RegistryError> {
        let name = name.into();
        if self.contracts.contains_key(&name) {
            return Err(RegistryError::DuplicateContract(name));
        }
        let validator = jsonschema::JSONSchema::compile(&schema).map_err(|e| {
            RegistryError::InvalidSchema {
                name: name.clone(),
                message: e.to_string(),
            }
        })?;
        self.contracts
            .insert(name, Arc::new(CompiledContract { schema, validator }));
        Ok(())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.contracts.contains_key(name)
    }

    /// The raw schema document for `name`.
    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.contracts.get(name).map(|c| &c.schema)
    }

    /// Validate `value` against the contract `name`. Returns the list of
    /// schema violations, empty on success.
    pub fn validate(&self, name: &str, value: &Value) -> Result<Vec<String>, RegistryError> {
        let contract = self
            .contracts
            .get(name)
            .ok_or_else(|| RegistryError::UnknownContract(name.to_string()))?;
        match contract.validator.validate(value) {
            Ok(()) => Ok(Vec::new()),
            Err(errors) => Ok(errors.map(|e| e.to_string()).collect()),
        }
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.contracts.keys().collect();
        names.sort();
        f.debug_struct("ContractRegistry")
            .field("contracts", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_display_and_parse() {
        let cases = [
            "any", "text", "secret", "number", "boolean", "file", "json", "map",
            "list<text>", "list<list<number>>", "contract<llm.provider.v1>",
            "list<contract<mcp.tool.v1>>",
        ];
        for case in cases {
            let parsed: PortType = case.parse().unwrap();
            assert_eq!(parsed.to_string(), case);
        }
        assert!("list<".parse::<PortType>().is_err());
        assert!("widget".parse::<PortType>().is_err());
        assert!("contract<>".parse::<PortType>().is_err());
    }

    #[test]
    fn test_identical_and_any_compat() {
        assert_eq!(
            compatibility(&PortType::Text, &PortType::Text),
            Compatibility::Direct
        );
        assert_eq!(
            compatibility(&PortType::Any, &PortType::Number),
            Compatibility::Direct
        );
        assert_eq!(
            compatibility(&PortType::File, &PortType::Any),
            Compatibility::Direct
        );
        assert_eq!(
            compatibility(
                &PortType::contract("llm.provider.v1"),
                &PortType::contract("llm.provider.v1")
            ),
            Compatibility::Direct
        );
        assert_eq!(
            compatibility(
                &PortType::contract("llm.provider.v1"),
                &PortType::contract("llm.provider.v2")
            ),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn test_asymmetric_coercions() {
        // Declared directions work...
        assert_eq!(
            compatibility(&PortType::File, &PortType::Text),
            Compatibility::Coerce
        );
        assert_eq!(
            compatibility(&PortType::Text, &PortType::Json),
            Compatibility::Coerce
        );
        assert_eq!(
            compatibility(&PortType::Text, &PortType::Number),
            Compatibility::Coerce
        );
        // ...their inverses do not, unless separately declared.
        assert_eq!(
            compatibility(&PortType::Text, &PortType::File),
            Compatibility::Incompatible
        );
        assert_eq!(
            compatibility(&PortType::Number, &PortType::Boolean),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn test_list_covariance_and_fanout() {
        let list_text = PortType::list(PortType::Text);
        let list_number = PortType::list(PortType::Number);
        assert_eq!(
            compatibility(&list_text, &list_text),
            Compatibility::Direct
        );
        assert_eq!(
            compatibility(&list_text, &list_number),
            Compatibility::Coerce
        );
        assert_eq!(
            compatibility(&list_text, &PortType::Text),
            Compatibility::FanOut
        );
        assert_eq!(
            compatibility(&list_text, &PortType::Number),
            Compatibility::FanOut
        );
        assert_eq!(
            compatibility(&PortType::list(PortType::File), &PortType::Boolean),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn test_coerce_lexical() {
        assert_eq!(
            coerce(&json!("42"), &PortType::Text, &PortType::Number).unwrap(),
            json!(42.0)
        );
        assert_eq!(
            coerce(&json!("true"), &PortType::Text, &PortType::Boolean).unwrap(),
            json!(true)
        );
        assert_eq!(
            coerce(&json!(7), &PortType::Number, &PortType::Text).unwrap(),
            json!("7")
        );
        assert_eq!(
            coerce(&json!("{\"a\":1}"), &PortType::Text, &PortType::Json).unwrap(),
            json!({"a": 1})
        );
        assert!(coerce(&json!("nope"), &PortType::Text, &PortType::Number).is_err());
    }

    #[test]
    fn test_coerce_file_content() {
        let file = json!({"name": "report.txt", "content": "hello"});
        assert_eq!(
            coerce(&file, &PortType::File, &PortType::Text).unwrap(),
            json!("hello")
        );
        let reference = json!({"artifactId": "a-1"});
        let err = coerce(&reference, &PortType::File, &PortType::Text).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_coerce_list_elements() {
        let src = PortType::list(PortType::Text);
        let dst = PortType::list(PortType::Number);
        assert_eq!(
            coerce(&json!(["1", "2"]), &src, &dst).unwrap(),
            json!([1.0, 2.0])
        );
    }

    #[test]
    fn test_contract_registry_validate() {
        let mut registry = ContractRegistry::new();
        registry
            .register(
                "llm.provider.v1",
                json!({
                    "type": "object",
                    "required": ["provider", "model"],
                    "properties": {
                        "provider": {"type": "string"},
                        "model": {"type": "string"}
                    }
                }),
            )
            .unwrap();

        let ok = registry
            .validate(
                "llm.provider.v1",
                &json!({"provider": "anthropic", "model": "claude"}),
            )
            .unwrap();
        assert!(ok.is_empty());

        let violations = registry
            .validate("llm.provider.v1", &json!({"provider": "anthropic"}))
            .unwrap();
        assert!(!violations.is_empty());

        assert!(matches!(
            registry.validate("missing.v1", &json!({})),
            Err(RegistryError::UnknownContract(_))
        ));
    }

    #[test]
    fn test_contract_registry_rejects_duplicates() {
        let mut registry = ContractRegistry::new();
        registry.register("c.v1", json!({"type": "object"})).unwrap();
        assert!(matches!(
            registry.register("c.v1", json!({"type": "object"})),
            Err(RegistryError::DuplicateContract(_))
        ));
    }

    fn port_type_strategy() -> impl Strategy<Value = PortType> {
        let leaf = prop_oneof![
            Just(PortType::Any),
            Just(PortType::Text),
            Just(PortType::Secret),
            Just(PortType::Number),
            Just(PortType::Boolean),
            Just(PortType::File),
            Just(PortType::Json),
            Just(PortType::Map),
            "[a-z]{1,8}(\\.[a-z0-9]{1,8}){0,2}".prop_map(PortType::Contract),
        ];
        leaf.prop_recursive(3, 8, 1, |inner| {
            inner.prop_map(|t| PortType::List(Box::new(t)))
        })
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(port in port_type_strategy()) {
            let text = port.to_string();
            let parsed: PortType = text.parse().unwrap();
            prop_assert_eq!(parsed, port);
        }
    }
}
