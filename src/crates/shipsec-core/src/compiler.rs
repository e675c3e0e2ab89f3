//! Graph compiler: authored graph in, execution plan out
//!
//! Compilation runs a fixed sequence of passes over the flat node/edge
//! tables:
//!
//! 1. **Node resolution** — look up each node's component, merge static
//!    ports with the `resolve_ports` hook.
//! 2. **Parameter validation** — required parameters, per-field JSON
//!    Schema checks, defaults applied.
//! 3. **Cycle detection** — depth-first search over dataflow edges; entry
//!    nodes are those with in-degree zero and at least one is required.
//! 4. **Edge validation** — ports located on the effective tables, §4.1
//!    compatibility, multi-arity enforcement. Edges are checked in
//!    topological order so fan-out *lifting* composes: once a node fans
//!    out, its outputs read as `list<T>` to a downstream `all` join and
//!    as the scalar winner to an `any`/`first` join.
//! 5. **Plan emission** — deterministic topological order (ties broken by
//!    node id), branching-output discovery, content hash.
//!
//! Compilation either yields an [`ExecutionPlan`] or a [`CompileReport`]
//! with node/edge coordinates per issue — never a partial plan. The
//! compiler is re-runnable: an unchanged graph reproduces an identical
//! hash.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::{ComponentRegistry, ResolvedPorts};
use crate::graph::{Graph, GraphNode, JoinStrategy};
use crate::plan::{ExecutionPlan, PlanEdge, PlanNode};
use crate::port::{compatibility, Compatibility, ContractRegistry, PortType};

/// One structured compile error with coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileIssue {
    /// Offending node id, when the issue is node-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Offending edge id, when the issue is edge-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<String>,
    /// Offending parameter or port id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl CompileIssue {
    fn node(node: &str, message: impl Into<String>) -> Self {
        Self {
            node: Some(node.to_string()),
            edge: None,
            field: None,
            message: message.into(),
        }
    }

    fn field(node: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            node: Some(node.to_string()),
            edge: None,
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    fn edge(edge: &str, message: impl Into<String>) -> Self {
        Self {
            node: None,
            edge: Some(edge.to_string()),
            field: None,
            message: message.into(),
        }
    }

    fn graph(message: impl Into<String>) -> Self {
        Self {
            node: None,
            edge: None,
            field: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CompileIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "node '{}'", node)?;
            if let Some(field) = &self.field {
                write!(f, " field '{}'", field)?;
            }
            write!(f, ": ")?;
        } else if let Some(edge) = &self.edge {
            write!(f, "edge '{}': ", edge)?;
        }
        f.write_str(&self.message)
    }
}

/// All issues found during one compile pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileReport {
    pub issues: Vec<CompileIssue>,
}

impl CompileReport {
    fn push(&mut self, issue: CompileIssue) {
        self.issues.push(issue);
    }

    /// Whether any issue was recorded.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl std::fmt::Display for CompileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph failed to compile with {} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileReport {}

/// Compile an authored graph against the current registries.
pub fn compile(
    graph: &Graph,
    registry: &ComponentRegistry,
    contracts: &ContractRegistry,
) -> Result<ExecutionPlan, CompileReport> {
    let mut report = CompileReport::default();

    if graph.nodes.is_empty() {
        report.push(CompileIssue::graph("graph has no nodes"));
        return Err(report);
    }

    // Pass 1: node resolution.
    let mut seen_ids = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            report.push(CompileIssue::node(&node.id, "duplicate node id"));
        }
    }

    let mut resolved: HashMap<&str, ResolvedPorts> = HashMap::new();
    for node in &graph.nodes {
        let Some(def) = registry.get(&node.component) else {
            report.push(CompileIssue::node(
                &node.id,
                format!("unknown component '{}'", node.component),
            ));
            continue;
        };
        match registry.resolve_ports(&def, &node.config.params) {
            Ok(ports) => {
                check_contract_references(&node.id, &ports, contracts, &mut report);
                resolved.insert(node.id.as_str(), ports);
            }
            Err(err) => report.push(CompileIssue::node(&node.id, err.to_string())),
        }
    }

    // Pass 2: parameter validation.
    let mut effective_params: HashMap<&str, serde_json::Map<String, Value>> = HashMap::new();
    for node in &graph.nodes {
        if let Some(def) = registry.get(&node.component) {
            let params = validate_params(node, &def, &mut report);
            effective_params.insert(node.id.as_str(), params);
        }
    }

    // Pass 3: cycle detection and entry nodes.
    detect_cycles(graph, &mut report);

    let mut in_degree: BTreeMap<&str, usize> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), 0))
        .collect();
    for edge in &graph.edges {
        if let Some(count) = in_degree.get_mut(edge.target_node.as_str()) {
            *count += 1;
        }
    }
    let entries: Vec<&str> = in_degree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    if entries.is_empty() {
        report.push(CompileIssue::graph(
            "graph has no entry node (every node has an inbound edge)",
        ));
    }

    // A cyclic graph has no usable edge order; stop here.
    if !report.is_empty() {
        return Err(report);
    }

    // Pass 4: edge validation, in topological order of the source node
    // so fan-out lifting is known before downstream edges are checked.
    let authored_position = authored_topo_positions(graph);
    let mut ordered_edges: Vec<&crate::graph::GraphEdge> = graph.edges.iter().collect();
    ordered_edges.sort_by(|a, b| {
        let pa = authored_position.get(a.source_node.as_str()).copied().unwrap_or(usize::MAX);
        let pb = authored_position.get(b.source_node.as_str()).copied().unwrap_or(usize::MAX);
        pa.cmp(&pb).then_with(|| a.id.cmp(&b.id))
    });

    let mut lifted: HashSet<&str> = HashSet::new();
    let mut edge_meta: HashMap<&str, (bool, Option<(PortType, PortType)>)> = HashMap::new();
    let mut landings: HashMap<(&str, &str), usize> = HashMap::new();
    for edge in ordered_edges {
        let source_ports = match resolved.get(edge.source_node.as_str()) {
            Some(ports) => ports,
            None => {
                if graph.node(&edge.source_node).is_none() {
                    report.push(CompileIssue::edge(
                        &edge.id,
                        format!("source node '{}' does not exist", edge.source_node),
                    ));
                }
                continue;
            }
        };
        let target_ports = match resolved.get(edge.target_node.as_str()) {
            Some(ports) => ports,
            None => {
                if graph.node(&edge.target_node).is_none() {
                    report.push(CompileIssue::edge(
                        &edge.id,
                        format!("target node '{}' does not exist", edge.target_node),
                    ));
                }
                continue;
            }
        };

        let Some(source) = source_ports.outputs.iter().find(|p| p.id == edge.source_port) else {
            report.push(CompileIssue::edge(
                &edge.id,
                format!(
                    "node '{}' has no output '{}'",
                    edge.source_node, edge.source_port
                ),
            ));
            continue;
        };
        let Some(target) = target_ports.inputs.iter().find(|p| p.id == edge.target_port) else {
            report.push(CompileIssue::edge(
                &edge.id,
                format!(
                    "node '{}' has no input '{}'",
                    edge.target_node, edge.target_port
                ),
            ));
            continue;
        };

        let landing = landings
            .entry((edge.target_node.as_str(), edge.target_port.as_str()))
            .or_insert(0);
        *landing += 1;
        if *landing > 1 && !target.multi {
            report.push(CompileIssue::edge(
                &edge.id,
                format!(
                    "input '{}' of node '{}' already has an inbound edge and is not multi-arity",
                    edge.target_port, edge.target_node
                ),
            ));
            continue;
        }

        // Lifting: a fanned-out source delivers a list to an `all` join
        // and the scalar winner to an `any`/`first` join.
        let effective_type = if lifted.contains(edge.source_node.as_str()) {
            let strategy = graph
                .node(&edge.target_node)
                .and_then(|n| n.config.join_strategy)
                .unwrap_or_default();
            match strategy {
                JoinStrategy::All => PortType::List(Box::new(source.port_type.clone())),
                JoinStrategy::Any | JoinStrategy::First => source.port_type.clone(),
            }
        } else {
            source.port_type.clone()
        };

        match compatibility(&effective_type, &target.port_type) {
            Compatibility::Direct => {
                edge_meta.insert(edge.id.as_str(), (false, None));
            }
            Compatibility::Coerce => {
                edge_meta.insert(
                    edge.id.as_str(),
                    (false, Some((effective_type, target.port_type.clone()))),
                );
            }
            Compatibility::FanOut => {
                if !lifted.insert(edge.target_node.as_str()) {
                    report.push(CompileIssue::edge(
                        &edge.id,
                        format!(
                            "node '{}' already fans out on another input; a node may fan out on at most one input",
                            edge.target_node
                        ),
                    ));
                    continue;
                }
                let element = match &effective_type {
                    PortType::List(inner) => inner.as_ref().clone(),
                    other => other.clone(),
                };
                let coercion = match compatibility(&element, &target.port_type) {
                    Compatibility::Coerce => Some((element, target.port_type.clone())),
                    _ => None,
                };
                edge_meta.insert(edge.id.as_str(), (true, coercion));
            }
            Compatibility::Incompatible => {
                report.push(CompileIssue::edge(
                    &edge.id,
                    format!(
                        "type mismatch: {} is not assignable to {}",
                        effective_type.describe(),
                        target.port_type.describe()
                    ),
                ));
            }
        }
    }

    if !report.is_empty() {
        return Err(report);
    }

    // Pass 5: plan emission. Node table sorted by id for determinism.
    let mut sorted_nodes: Vec<&GraphNode> = graph.nodes.iter().collect();
    sorted_nodes.sort_by(|a, b| a.id.cmp(&b.id));
    let index_of: HashMap<&str, usize> = sorted_nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let nodes: Vec<PlanNode> = sorted_nodes
        .iter()
        .map(|node| {
            let ports = resolved.remove(node.id.as_str()).expect("resolved above");
            let def = registry.get(&node.component).expect("resolved above");
            let branching_outputs = ports
                .outputs
                .iter()
                .filter(|p| p.is_branching)
                .map(|p| p.id.clone())
                .collect();
            PlanNode {
                id: node.id.clone(),
                component: node.component.clone(),
                runner: def.runner.clone(),
                inputs: ports.inputs,
                outputs: ports.outputs,
                params: effective_params
                    .remove(node.id.as_str())
                    .unwrap_or_default(),
                input_overrides: node.config.input_overrides.clone(),
                join_strategy: node.config.join_strategy,
                max_concurrency: node.config.max_concurrency,
                retry: def.retry.clone(),
                branching_outputs,
            }
        })
        .collect();

    let mut edges: Vec<PlanEdge> = graph
        .edges
        .iter()
        .map(|edge| {
            let (fan_out, coercion) = edge_meta
                .get(edge.id.as_str())
                .cloned()
                .unwrap_or((false, None));
            PlanEdge {
                id: edge.id.clone(),
                source: index_of[edge.source_node.as_str()],
                source_port: edge.source_port.clone(),
                target: index_of[edge.target_node.as_str()],
                target_port: edge.target_port.clone(),
                fan_out,
                coercion,
            }
        })
        .collect();
    edges.sort_by(|a, b| a.id.cmp(&b.id));

    let entry: Vec<usize> = entries.iter().map(|id| index_of[id]).collect();
    let order = topological_order(&nodes, &edges);

    let plan = ExecutionPlan {
        workflow_id: graph.workflow_id.clone(),
        graph_version: graph.version,
        hash: String::new(),
        nodes,
        edges,
        entry,
        order,
    };
    Ok(plan.seal())
}

/// Report contract port types that reference unregistered contracts.
fn check_contract_references(
    node_id: &str,
    ports: &ResolvedPorts,
    contracts: &ContractRegistry,
    report: &mut CompileReport,
) {
    fn contract_name(port_type: &PortType) -> Option<&str> {
        match port_type {
            PortType::Contract(name) => Some(name),
            PortType::List(inner) => contract_name(inner),
            _ => None,
        }
    }
    for port in ports.inputs.iter().chain(ports.outputs.iter()) {
        if let Some(name) = contract_name(&port.port_type) {
            if !contracts.contains(name) {
                report.push(CompileIssue::field(
                    node_id,
                    &port.id,
                    format!("references unregistered contract '{}'", name),
                ));
            }
        }
    }
}

/// Validate a node's params against the component's parameter schema,
/// surfacing rejections per field, and return the effective values with
/// defaults applied.
fn validate_params(
    node: &GraphNode,
    def: &crate::component::ComponentDefinition,
    report: &mut CompileReport,
) -> serde_json::Map<String, Value> {
    let mut effective = serde_json::Map::new();

    for key in node.config.params.keys() {
        if def.parameter(key).is_none() {
            report.push(CompileIssue::field(
                &node.id,
                key,
                format!("component '{}' declares no such parameter", def.id),
            ));
        }
    }

    for param in &def.parameters {
        let value = node
            .config
            .params
            .get(&param.id)
            .cloned()
            .or_else(|| param.default.clone());
        let Some(value) = value else {
            if param.required {
                report.push(CompileIssue::field(
                    &node.id,
                    &param.id,
                    "required parameter is missing",
                ));
            }
            continue;
        };
        if let Some(schema) = &param.schema {
            match jsonschema::JSONSchema::compile(schema) {
                Ok(validator) => {
                    if let Err(errors) = validator.validate(&value) {
                        for error in errors {
                            report.push(CompileIssue::field(&node.id, &param.id, error.to_string()));
                        }
                        continue;
                    }
                }
                Err(error) => {
                    report.push(CompileIssue::field(
                        &node.id,
                        &param.id,
                        format!("parameter schema is invalid: {}", error),
                    ));
                    continue;
                }
            }
        }
        effective.insert(param.id.clone(), value);
    }

    effective
}

/// Depth-first search for back-edges on the dataflow digraph.
fn detect_cycles(graph: &Graph, report: &mut CompileReport) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in &graph.nodes {
        adjacency.entry(node.id.as_str()).or_default();
    }
    for edge in &graph.edges {
        if graph.node(&edge.source_node).is_some() && graph.node(&edge.target_node).is_some() {
            adjacency
                .entry(edge.source_node.as_str())
                .or_default()
                .push(edge.target_node.as_str());
        }
    }

    let mut colors: HashMap<&str, Color> =
        adjacency.keys().map(|id| (*id, Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
        report: &mut CompileReport,
    ) {
        colors.insert(node, Color::Gray);
        for next in adjacency.get(node).into_iter().flatten() {
            match colors.get(next) {
                Some(Color::White) => visit(next, adjacency, colors, report),
                Some(Color::Gray) => {
                    report.push(CompileIssue::node(
                        next,
                        format!("cycle detected through '{}'", node),
                    ));
                }
                _ => {}
            }
        }
        colors.insert(node, Color::Black);
    }

    let roots: Vec<&str> = adjacency.keys().copied().collect();
    for root in roots {
        if colors[root] == Color::White {
            visit(root, &adjacency, &mut colors, report);
        }
    }
}

/// Topological position of every authored node (Kahn's algorithm, ties
/// broken by node id). Used to order the edge-validation pass.
fn authored_topo_positions(graph: &Graph) -> HashMap<&str, usize> {
    let mut in_degree: BTreeMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &graph.edges {
        if in_degree.contains_key(edge.source_node.as_str()) {
            if let Some(count) = in_degree.get_mut(edge.target_node.as_str()) {
                *count += 1;
            }
        }
    }

    let mut frontier: Vec<&str> = in_degree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut positions = HashMap::new();
    while let Some(&next) = frontier.first() {
        frontier.remove(0);
        positions.insert(next, positions.len());
        let mut unlocked = Vec::new();
        for edge in graph.edges.iter().filter(|e| e.source_node == next) {
            if let Some(count) = in_degree.get_mut(edge.target_node.as_str()) {
                *count -= 1;
                if *count == 0 {
                    unlocked.push(edge.target_node.as_str());
                }
            }
        }
        for id in unlocked {
            let position = frontier.partition_point(|&f| f < id);
            if frontier.get(position) != Some(&id) {
                frontier.insert(position, id);
            }
        }
    }
    positions
}

/// Kahn's algorithm with a sorted frontier so ties break by node id.
fn topological_order(nodes: &[PlanNode], edges: &[PlanEdge]) -> Vec<usize> {
    let mut in_degree = vec![0usize; nodes.len()];
    for edge in edges {
        in_degree[edge.target] += 1;
    }

    // The node table is sorted by id, so index order is id order.
    let mut frontier: Vec<usize> = (0..nodes.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(&next) = frontier.first() {
        frontier.remove(0);
        order.push(next);
        let mut unlocked = Vec::new();
        for edge in edges.iter().filter(|e| e.source == next) {
            in_degree[edge.target] -= 1;
            if in_degree[edge.target] == 0 {
                unlocked.push(edge.target);
            }
        }
        for index in unlocked {
            let position = frontier.partition_point(|&i| i < index);
            if frontier.get(position) != Some(&index) {
                frontier.insert(position, index);
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDefinition, ParamSpec, PortSpec};
    use serde_json::json;

    fn test_registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .register(
                ComponentDefinition::new("test.source", "test")
                    .with_output(PortSpec::new("items", PortType::list(PortType::Text)))
                    .with_output(PortSpec::new("single", PortType::Text)),
            )
            .unwrap();
        registry
            .register(
                ComponentDefinition::new("test.upper", "test")
                    .with_input(PortSpec::new("value", PortType::Text))
                    .with_output(PortSpec::new("value", PortType::Text))
                    .with_parameter(
                        ParamSpec::new("mode")
                            .with_schema(json!({"type": "string", "enum": ["upper", "lower"]}))
                            .with_default(json!("upper")),
                    ),
            )
            .unwrap();
        registry
            .register(
                ComponentDefinition::new("test.collect", "test")
                    .with_input(PortSpec::new("values", PortType::list(PortType::Text)))
                    .with_output(PortSpec::new("values", PortType::list(PortType::Text))),
            )
            .unwrap();
        registry
    }

    fn linear_graph() -> Graph {
        let mut graph = Graph::new("wf-1", "linear");
        graph.add_node("source", "test.source");
        graph.add_node("upper", "test.upper");
        graph.add_node("collect", "test.collect");
        graph.add_edge("e1", ("source", "items"), ("upper", "value"));
        graph.add_edge("e2", ("upper", "value"), ("collect", "values"));
        graph
    }

    #[test]
    fn test_compile_linear_graph() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let plan = compile(&linear_graph(), &registry, &contracts).unwrap();

        assert_eq!(plan.nodes.len(), 3);
        // Node table sorted by id: collect, source, upper.
        assert_eq!(plan.nodes[0].id, "collect");
        assert_eq!(plan.nodes[1].id, "source");
        assert_eq!(plan.nodes[2].id, "upper");
        // Entry is the source node.
        assert_eq!(plan.entry, vec![1]);
        // Topological order: source, upper, collect.
        assert_eq!(plan.order, vec![1, 2, 0]);
        assert!(!plan.hash.is_empty());

        // list<text> -> scalar text marks the edge as fan-out.
        let e1 = plan.edges.iter().find(|e| e.id == "e1").unwrap();
        assert!(e1.fan_out);
        let e2 = plan.edges.iter().find(|e| e.id == "e2").unwrap();
        assert!(!e2.fan_out);

        // Defaults applied to params.
        assert_eq!(plan.node("upper").unwrap().params["mode"], json!("upper"));
    }

    #[test]
    fn test_recompile_is_deterministic() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let a = compile(&linear_graph(), &registry, &contracts).unwrap();
        let b = compile(&linear_graph(), &registry, &contracts).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a, b);
    }

    #[test]
    fn test_plan_roundtrip_preserves_hash() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let plan = compile(&linear_graph(), &registry, &contracts).unwrap();
        let text = serde_json::to_string(&plan).unwrap();
        let back: ExecutionPlan = serde_json::from_str(&text).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.content_hash(), plan.hash);
    }

    #[test]
    fn test_unknown_component_reported() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "bad");
        graph.add_node("ghost", "test.missing");

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].node.as_deref(), Some("ghost"));
    }

    #[test]
    fn test_type_mismatch_reported_with_edge() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "bad");
        graph.add_node("source", "test.source");
        graph.add_node("collect", "test.collect");
        // text output into list<text> input is not assignable.
        graph.add_edge("bad-edge", ("source", "single"), ("collect", "values"));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        let issue = report
            .issues
            .iter()
            .find(|i| i.edge.as_deref() == Some("bad-edge"))
            .unwrap();
        assert!(issue.message.contains("not assignable"));
    }

    #[test]
    fn test_missing_port_reported() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "bad");
        graph.add_node("source", "test.source");
        graph.add_node("upper", "test.upper");
        graph.add_edge("e1", ("source", "nope"), ("upper", "value"));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report.issues[0].message.contains("no output 'nope'"));
    }

    #[test]
    fn test_duplicate_landing_rejected() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "bad");
        graph.add_node("source", "test.source");
        graph.add_node("upper", "test.upper");
        graph.add_edge("e1", ("source", "single"), ("upper", "value"));
        graph.add_edge("e2", ("source", "single"), ("upper", "value"));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report
            .issues
            .iter()
            .any(|i| i.edge.as_deref() == Some("e2") && i.message.contains("multi-arity")));
    }

    #[test]
    fn test_cycle_rejected() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "cyclic");
        graph.add_node("a", "test.upper");
        graph.add_node("b", "test.upper");
        graph.add_edge("e1", ("a", "value"), ("b", "value"));
        graph.add_edge("e2", ("b", "value"), ("a", "value"));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report.issues.iter().any(|i| i.message.contains("cycle")));
        // A fully cyclic graph also has no entry node.
        assert!(report.issues.iter().any(|i| i.message.contains("entry")));
    }

    #[test]
    fn test_lifted_output_feeds_scalar_input_on_any_join() {
        let mut registry = test_registry();
        registry
            .register(
                ComponentDefinition::new("test.sink", "test")
                    .with_input(PortSpec::new("value", PortType::Text))
                    .with_output(PortSpec::new("value", PortType::Text)),
            )
            .unwrap();
        let contracts = ContractRegistry::new();

        let mut graph = Graph::new("wf-1", "any-join");
        graph.add_node("source", "test.source");
        graph.add_node("upper", "test.upper");
        let sink = graph.add_node("sink", "test.sink");
        sink.config.join_strategy = Some(crate::graph::JoinStrategy::Any);
        graph.add_edge("e1", ("source", "items"), ("upper", "value"));
        // The winner of the any-join is a scalar text value.
        graph.add_edge("e2", ("upper", "value"), ("sink", "value"));

        let plan = compile(&graph, &registry, &contracts).unwrap();
        let e2 = plan.edges.iter().find(|e| e.id == "e2").unwrap();
        assert!(!e2.fan_out);
    }

    #[test]
    fn test_lifted_output_rejected_against_scalar_all_join() {
        let mut registry = test_registry();
        registry
            .register(
                ComponentDefinition::new("test.sink", "test")
                    .with_input(PortSpec::new("value", PortType::Text))
                    .with_output(PortSpec::new("value", PortType::Text)),
            )
            .unwrap();
        let contracts = ContractRegistry::new();

        let mut graph = Graph::new("wf-1", "bad-join");
        graph.add_node("source", "test.source");
        graph.add_node("upper", "test.upper");
        graph.add_node("sink", "test.sink");
        graph.add_edge("e1", ("source", "items"), ("upper", "value"));
        // Default join is `all`, which delivers list<text>; scalar text
        // input fans out again, which is fine -- but a second fan-out
        // input on the same node is rejected.
        graph.add_edge("e2", ("upper", "value"), ("sink", "value"));
        graph.add_edge("e3", ("source", "items"), ("sink", "value"));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("at most one input")
                || i.message.contains("multi-arity")));
    }

    #[test]
    fn test_param_schema_violation_reported_per_field() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "bad-params");
        graph.add_node("source", "test.source");
        let node = graph.add_node("upper", "test.upper");
        node.config.params.insert("mode".into(), json!("shout"));
        graph.add_edge("e1", ("source", "single"), ("upper", "value"));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        let issue = &report.issues[0];
        assert_eq!(issue.node.as_deref(), Some("upper"));
        assert_eq!(issue.field.as_deref(), Some("mode"));
    }

    #[test]
    fn test_unknown_param_reported() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "bad-params");
        let node = graph.add_node("source", "test.source");
        node.config.params.insert("bogus".into(), json!(1));

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report.issues[0].message.contains("no such parameter"));
    }

    #[test]
    fn test_empty_graph_rejected() {
        let registry = test_registry();
        let contracts = ContractRegistry::new();
        let graph = Graph::new("wf-1", "empty");
        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report.issues[0].message.contains("no nodes"));
    }

    #[test]
    fn test_unregistered_contract_reported() {
        let mut registry = test_registry();
        registry
            .register(
                ComponentDefinition::new("test.llm", "test")
                    .with_input(PortSpec::new(
                        "provider",
                        PortType::contract("llm.provider.v1"),
                    ))
                    .with_output(PortSpec::new("reply", PortType::Text)),
            )
            .unwrap();
        let contracts = ContractRegistry::new();
        let mut graph = Graph::new("wf-1", "contracts");
        graph.add_node("llm", "test.llm");

        let report = compile(&graph, &registry, &contracts).unwrap_err();
        assert!(report.issues[0]
            .message
            .contains("unregistered contract 'llm.provider.v1'"));
    }
}
