//! Compiled execution plans
//!
//! A plan is the validated, content-addressed form of a graph. All
//! cross-references are index-based (`usize` into the node table) so the
//! plan itself is acyclic data even though edges describe a digraph.
//! Plans are immutable once committed; a run binds to exactly one plan
//! hash for its lifetime.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::component::{PortSpec, RetryPolicy, RunnerKind};
use crate::graph::JoinStrategy;
use crate::port::PortType;

/// A compiled node with resolved port tables and validated parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Node id from the authored graph.
    pub id: String,
    /// Component definition id.
    pub component: String,
    /// Runner copied from the definition at compile time.
    pub runner: RunnerKind,
    /// Effective inputs (static merged with dynamically resolved).
    pub inputs: Vec<PortSpec>,
    /// Effective outputs.
    pub outputs: Vec<PortSpec>,
    /// Validated parameter values with defaults applied.
    pub params: serde_json::Map<String, Value>,
    /// Manual input overrides.
    pub input_overrides: serde_json::Map<String, Value>,
    /// Join strategy when consuming a fan-out family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_strategy: Option<JoinStrategy>,
    /// Bound on concurrent fan-out children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Retry policy copied from the definition.
    pub retry: RetryPolicy,
    /// Output port ids flagged as branching.
    #[serde(default)]
    pub branching_outputs: Vec<String>,
}

impl PlanNode {
    /// Look up an effective input port.
    pub fn input(&self, port: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.id == port)
    }

    /// Look up an effective output port.
    pub fn output(&self, port: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.id == port)
    }
}

/// A validated dataflow edge, index-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEdge {
    /// Edge id from the authored graph.
    pub id: String,
    /// Index of the source node in [`ExecutionPlan::nodes`].
    pub source: usize,
    /// Source output port id.
    pub source_port: String,
    /// Index of the target node.
    pub target: usize,
    /// Target input port id.
    pub target_port: String,
    /// Whether this edge fans a source list out into per-element child
    /// invocations of the target.
    #[serde(default)]
    pub fan_out: bool,
    /// The declared coercion applied at delivery time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coercion: Option<(PortType, PortType)>,
}

/// The compiled artifact: topological order, resolved port tables,
/// validated edges, entry set, and content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Workflow the plan was compiled from.
    pub workflow_id: String,
    /// Graph version counter at compile time.
    pub graph_version: u64,
    /// Content hash binding runs to this exact plan.
    pub hash: String,
    /// Node table, sorted by node id for determinism.
    pub nodes: Vec<PlanNode>,
    /// Validated edges, sorted by edge id.
    pub edges: Vec<PlanEdge>,
    /// Indices of entry nodes (in-degree zero on dataflow edges).
    pub entry: Vec<usize>,
    /// Deterministic topological order (ties broken by node id).
    pub order: Vec<usize>,
}

impl ExecutionPlan {
    /// Index of the node with the given id.
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Node lookup by id.
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges arriving at the node at `index`.
    pub fn incoming(&self, index: usize) -> impl Iterator<Item = &PlanEdge> {
        self.edges.iter().filter(move |e| e.target == index)
    }

    /// Edges leaving the node at `index`.
    pub fn outgoing(&self, index: usize) -> impl Iterator<Item = &PlanEdge> {
        self.edges.iter().filter(move |e| e.source == index)
    }

    /// Recompute the content hash over the normalized plan (everything
    /// except the hash field itself, object keys sorted).
    pub fn content_hash(&self) -> String {
        let mut normalized = self.clone();
        normalized.hash = String::new();
        let value = serde_json::to_value(&normalized).expect("plan serializes");
        let canonical = canonical_json(&value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Stamp the content hash into the plan.
    pub fn seal(mut self) -> Self {
        self.hash = self.content_hash();
        self
    }
}

/// Render a JSON value with recursively sorted object keys, the canonical
/// form the content hash is computed over.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string serializes"));
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => {
                out.push_str(&serde_json::to_string(other).expect("scalar serializes"));
            }
        }
    }
    let mut out = String::new();
    write(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_plan() -> ExecutionPlan {
        ExecutionPlan {
            workflow_id: "wf-1".to_string(),
            graph_version: 3,
            hash: String::new(),
            nodes: vec![PlanNode {
                id: "entry".to_string(),
                component: "core.entry".to_string(),
                runner: RunnerKind::Inline,
                inputs: vec![],
                outputs: vec![PortSpec::new("domain", PortType::Text)],
                params: serde_json::Map::new(),
                input_overrides: serde_json::Map::new(),
                join_strategy: None,
                max_concurrency: None,
                retry: RetryPolicy::none(),
                branching_outputs: vec![],
            }],
            edges: vec![],
            entry: vec![0],
            order: vec![0],
        }
        .seal()
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"z": true, "m": [3, {"y": 2, "x": 1}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":[3,{"x":1,"y":2}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_hash_is_stable() {
        let a = sample_plan();
        let b = sample_plan();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = sample_plan();
        let mut b = sample_plan();
        b.graph_version = 4;
        let b = b.seal();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_plan_serde_roundtrip() {
        let plan = sample_plan();
        let text = serde_json::to_string(&plan).unwrap();
        let back: ExecutionPlan = serde_json::from_str(&text).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.content_hash(), plan.hash);
    }
}
