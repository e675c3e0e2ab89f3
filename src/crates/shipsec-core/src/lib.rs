//! # shipsec-core - Type System and Graph Compiler
//!
//! Foundation crate for ShipSec Studio's workflow engine. It owns the
//! pieces that must agree before anything executes:
//!
//! - **Port & contract registry** ([`port`]) - the canonical type system
//!   for node I/O: primitives, named contracts bound to JSON Schemas,
//!   list/map constructors, compatibility rules, and runtime coercions.
//! - **Component registry** ([`component`]) - the catalog of component
//!   definitions: declared inputs, outputs, parameters, retry policy,
//!   runner kind, and the `resolve_ports` hook for dynamic I/O.
//! - **Graph compiler** ([`compiler`]) - validates an authored [`graph`],
//!   resolves dynamic ports, type-checks every edge, rejects cycles, and
//!   emits a content-addressed [`plan`].
//! - **Error taxonomy** ([`error`]) - the failure classification shared
//!   by the engine and every runner.
//!
//! # Example
//!
//! ```rust
//! use shipsec_core::component::{ComponentDefinition, ComponentRegistry, PortSpec};
//! use shipsec_core::compiler::compile;
//! use shipsec_core::graph::Graph;
//! use shipsec_core::port::{ContractRegistry, PortType};
//!
//! let mut registry = ComponentRegistry::new();
//! registry
//!     .register(
//!         ComponentDefinition::new("demo.echo", "demo")
//!             .with_output(PortSpec::new("value", PortType::Text)),
//!     )
//!     .unwrap();
//!
//! let mut graph = Graph::new("wf-demo", "demo");
//! graph.add_node("echo", "demo.echo");
//!
//! let plan = compile(&graph, &registry, &ContractRegistry::new()).unwrap();
//! assert_eq!(plan.entry.len(), 1);
//! assert_eq!(plan.hash.len(), 64);
//! ```

pub mod compiler;
pub mod component;
pub mod error;
pub mod graph;
pub mod plan;
pub mod port;

pub use compiler::{compile, CompileIssue, CompileReport};
pub use component::{
    ComponentDefinition, ComponentRegistry, ContainerSpec, ParamSpec, PortSpec, RemoteSpec,
    ResolvePortsFn, ResolvedPorts, RetryPolicy, RunnerKind,
};
pub use error::{ErrorKind, NodeError, RegistryError};
pub use graph::{Graph, GraphEdge, GraphNode, JoinStrategy, NodeConfig, Position};
pub use plan::{canonical_json, ExecutionPlan, PlanEdge, PlanNode};
pub use port::{coerce, compatibility, Compatibility, ContractRegistry, PortType, ValuePriority};
