//! Authored graph model: flat node and edge tables
//!
//! The editor persists graphs as flat tables; adjacency is reconstructed
//! at compile time, so an in-progress graph may freely hold
//! self-references or cycles. Only [`crate::compiler::compile`] rejects
//! them.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// Join strategy for collecting a fan-out family's outputs downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    /// Wait for every child; deliver outputs in source order.
    #[default]
    All,
    /// Deliver the first successful child's output; cancel the rest.
    Any,
    /// Deliver the first child's output regardless of success; cancel the
    /// rest.
    First,
}

/// Canvas position of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Per-node configuration block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Parameter values, validated against the component's parameter
    /// schemas at compile time.
    #[serde(default)]
    pub params: JsonMap<String, Value>,
    /// Manually supplied input values, applied per the input's
    /// `value_priority`.
    #[serde(default)]
    pub input_overrides: JsonMap<String, Value>,
    /// Join strategy when this node consumes a fan-out family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_strategy: Option<JoinStrategy>,
    /// Log-stream correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    /// Visual grouping id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Bound on concurrent child invocations during fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

/// One authored node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique node id within the graph.
    pub id: String,
    /// Component definition id.
    pub component: String,
    /// Canvas position.
    #[serde(default)]
    pub position: Position,
    /// Configuration block.
    #[serde(default)]
    pub config: NodeConfig,
}

/// One authored dataflow edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Unique edge id within the graph.
    pub id: String,
    /// Source node id.
    pub source_node: String,
    /// Source output port id.
    pub source_port: String,
    /// Target node id.
    pub target_node: String,
    /// Target input port id.
    pub target_port: String,
}

/// An authored workflow graph.
///
/// Carries a version counter; committing a new version freezes the
/// previous one for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Workflow id this graph belongs to.
    pub workflow_id: String,
    /// Display name.
    pub name: String,
    /// Version counter, advanced on commit.
    #[serde(default)]
    pub version: u64,
    /// Node table.
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    /// Edge table.
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    /// An empty graph for the given workflow.
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name: name.into(),
            version: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a node with default position and config.
    pub fn add_node(&mut self, id: impl Into<String>, component: impl Into<String>) -> &mut GraphNode {
        self.nodes.push(GraphNode {
            id: id.into(),
            component: component.into(),
            position: Position::default(),
            config: NodeConfig::default(),
        });
        self.nodes.last_mut().expect("just pushed")
    }

    /// Add an edge between two ports.
    pub fn add_edge(
        &mut self,
        id: impl Into<String>,
        source: (&str, &str),
        target: (&str, &str),
    ) {
        self.edges.push(GraphEdge {
            id: id.into(),
            source_node: source.0.to_string(),
            source_port: source.1.to_string(),
            target_node: target.0.to_string(),
            target_port: target.1.to_string(),
        });
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Mutable lookup of a node by id.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_construction() {
        let mut graph = Graph::new("wf-1", "Recon pipeline");
        graph.add_node("entry", "core.entry");
        graph.add_node("scan", "scan.subfinder");
        graph.add_edge("e1", ("entry", "domain"), ("scan", "domain"));

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.node("entry").is_some());
        assert!(graph.node("missing").is_none());
    }

    #[test]
    fn test_node_config_roundtrip() {
        let mut graph = Graph::new("wf-1", "test");
        let node = graph.add_node("n1", "core.transform.text");
        node.config.params.insert("mode".into(), json!("upper"));
        node.config.join_strategy = Some(JoinStrategy::Any);
        node.config.max_concurrency = Some(4);

        let text = serde_json::to_string(&graph).unwrap();
        let back: Graph = serde_json::from_str(&text).unwrap();
        assert_eq!(back, graph);
        assert_eq!(
            back.node("n1").unwrap().config.join_strategy,
            Some(JoinStrategy::Any)
        );
    }

    #[test]
    fn test_join_strategy_serde_lowercase() {
        assert_eq!(serde_json::to_string(&JoinStrategy::All).unwrap(), "\"all\"");
        assert_eq!(
            serde_json::from_str::<JoinStrategy>("\"first\"").unwrap(),
            JoinStrategy::First
        );
    }
}
