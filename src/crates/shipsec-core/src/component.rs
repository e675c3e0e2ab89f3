//! Component catalog: definitions, runner kinds, retry policies, and the
//! process-global registry
//!
//! A [`ComponentDefinition`] describes one node type: its identifier and
//! display category, the runner that executes it, its static input/output/
//! parameter shapes, a retry policy, and an optional
//! [`resolve_ports`](ComponentDefinition::resolve_ports) hook that extends
//! the static shape from parameter values. Definitions are registered at
//! process start into a [`ComponentRegistry`] and are immutable at runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use crate::error::{ErrorKind, RegistryError};
use crate::port::{PortType, ValuePriority};

/// A named, typed input or output of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port identifier, unique within the component's inputs or outputs.
    pub id: String,
    /// Display label.
    pub label: String,
    /// The port's type under the rules of [`crate::port`].
    #[serde(rename = "type")]
    pub port_type: PortType,
    /// Whether a value must be delivered (or manually supplied) for the
    /// node to become ready.
    #[serde(default)]
    pub required: bool,
    /// Whether multiple edges may land on this input.
    #[serde(default)]
    pub multi: bool,
    /// Edge-versus-manual precedence for this input.
    #[serde(default)]
    pub value_priority: ValuePriority,
    /// Marks an output as a branch selector: at runtime exactly one
    /// branching output fires and the others are masked.
    #[serde(default)]
    pub is_branching: bool,
}

impl PortSpec {
    /// A required port with the given id and type; the label defaults to
    /// the id.
    pub fn new(id: impl Into<String>, port_type: PortType) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            port_type,
            required: true,
            multi: false,
            value_priority: ValuePriority::default(),
            is_branching: false,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Mark the port optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Allow multiple inbound edges.
    pub fn multi_arity(mut self) -> Self {
        self.multi = true;
        self
    }

    /// Set the value priority.
    pub fn with_value_priority(mut self, priority: ValuePriority) -> Self {
        self.value_priority = priority;
        self
    }

    /// Mark the output as branching.
    pub fn branching(mut self) -> Self {
        self.is_branching = true;
        self
    }
}

/// A declared component parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter identifier.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Whether the parameter must be present.
    #[serde(default)]
    pub required: bool,
    /// Optional JSON Schema the value is validated against at compile
    /// time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Default applied when the author supplies no value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    /// An optional parameter with the given id; the label defaults to the
    /// id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            required: false,
            schema: None,
            default: None,
        }
    }

    /// Mark the parameter required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a JSON Schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attach a default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Configuration for the container runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference, e.g. `ghcr.io/shipsec/nuclei:latest`.
    pub image: String,
    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Command arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Extra environment variables (sorted for stable plan hashes).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Mount the invocation volume read-write instead of read-only.
    #[serde(default)]
    pub writable_workspace: bool,
    /// Wall-clock budget for one invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Whether stdout carries a delimited result envelope
    /// (`---RESULT_START---…---RESULT_END---`). When false, the whole
    /// stdout is the result string.
    #[serde(default)]
    pub result_envelope: bool,
}

impl ContainerSpec {
    /// A spec for the given image with defaults.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            entrypoint: None,
            command: None,
            env: BTreeMap::new(),
            writable_workspace: false,
            timeout_seconds: None,
            result_envelope: false,
        }
    }
}

/// Configuration for the remote runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSpec {
    /// Endpoint the invocation request is POSTed to.
    pub endpoint: String,
    /// Request timeout.
    #[serde(default = "RemoteSpec::default_timeout")]
    pub timeout_seconds: u64,
}

impl RemoteSpec {
    fn default_timeout() -> u64 {
        30
    }

    /// A spec for the given endpoint with the default timeout.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_seconds: Self::default_timeout(),
        }
    }
}

/// The dispatch strategy for a component. Sealed: the runtime dispatches
/// with a `match`, not inheritance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerKind {
    /// Executed in the engine's address space.
    Inline,
    /// Executed in a container with an isolated named volume.
    Container(ContainerSpec),
    /// Posted to a remote endpoint over HTTP.
    Remote(RemoteSpec),
}

/// Per-definition retry policy, interpreted uniformly by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first. Always at least 1.
    pub max_attempts: u32,
    /// Interval before the first retry, in seconds.
    pub initial_interval_seconds: f64,
    /// Upper bound on the interval, in seconds.
    pub maximum_interval_seconds: f64,
    /// Multiplier applied to the interval after each retry.
    pub backoff_coefficient: f64,
    /// Error kinds that are never retried even if attempts remain.
    #[serde(default)]
    pub non_retryable_error_kinds: Vec<ErrorKind>,
}

impl RetryPolicy {
    /// A policy with the given attempt budget and teacher defaults for
    /// the intervals.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval_seconds: 1.0,
            maximum_interval_seconds: 128.0,
            backoff_coefficient: 2.0,
            non_retryable_error_kinds: Vec::new(),
        }
    }

    /// Single-attempt policy: no retry on any error kind.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Set the initial interval.
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval_seconds = seconds;
        self
    }

    /// Set the maximum interval.
    pub fn with_maximum_interval(mut self, seconds: f64) -> Self {
        self.maximum_interval_seconds = seconds;
        self
    }

    /// Set the backoff coefficient.
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Add error kinds the policy refuses to retry.
    pub fn with_non_retryable(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.non_retryable_error_kinds = kinds;
        self
    }

    /// Delay before retrying after the given failed attempt (1-indexed):
    /// `min(initial * coefficient^(attempt-1), maximum)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_interval_seconds * self.backoff_coefficient.powi(exponent);
        Duration::from_secs_f64(raw.min(self.maximum_interval_seconds).max(0.0))
    }

    /// Whether a failure of `kind` after `attempt` attempts may be
    /// retried.
    pub fn allows_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        attempt < self.max_attempts
            && kind.retryable()
            && !self.non_retryable_error_kinds.contains(&kind)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Effective input and output tables after dynamic port resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPorts {
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
}

/// Hook extending a component's ports from its parameter values.
///
/// Must be pure and deterministic for a given `params` value. The return
/// augments the static shape; it may never remove or re-type a statically
/// declared port.
pub type ResolvePortsFn =
    Arc<dyn Fn(&JsonMap<String, Value>) -> Result<ResolvedPorts, String> + Send + Sync>;

/// A registered component definition. Immutable after registration.
#[derive(Clone)]
pub struct ComponentDefinition {
    /// Stable identifier, e.g. `human.approval`.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Display category for the catalog.
    pub category: String,
    /// Dispatch strategy.
    pub runner: RunnerKind,
    /// Statically declared inputs.
    pub inputs: Vec<PortSpec>,
    /// Statically declared outputs.
    pub outputs: Vec<PortSpec>,
    /// Declared parameters.
    pub parameters: Vec<ParamSpec>,
    /// Retry policy the engine applies to failed attempts.
    pub retry: RetryPolicy,
    /// Optional dynamic-port hook.
    pub resolve_ports: Option<ResolvePortsFn>,
}

impl ComponentDefinition {
    /// A new inline definition with no ports and the default retry
    /// policy.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            category: category.into(),
            runner: RunnerKind::Inline,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            retry: RetryPolicy::default(),
            resolve_ports: None,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the runner.
    pub fn with_runner(mut self, runner: RunnerKind) -> Self {
        self.runner = runner;
        self
    }

    /// Declare an input.
    pub fn with_input(mut self, spec: PortSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Declare an output.
    pub fn with_output(mut self, spec: PortSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Declare a parameter.
    pub fn with_parameter(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a dynamic-port hook.
    pub fn with_resolve_ports(mut self, hook: ResolvePortsFn) -> Self {
        self.resolve_ports = Some(hook);
        self
    }

    /// Look up a statically declared parameter.
    pub fn parameter(&self, id: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }
}

impl std::fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("runner", &self.runner)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("parameters", &self.parameters)
            .field("retry", &self.retry)
            .field("resolve_ports", &self.resolve_ports.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

/// Process-global catalog of component definitions.
///
/// Populated by the component-loader pass at startup and read-only after
/// that; tests reset by constructing a fresh instance.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<ComponentDefinition>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a definition; rejects duplicate ids.
    pub fn register(&mut self, def: ComponentDefinition) -> Result<(), RegistryError> {
        if self.components.contains_key(&def.id) {
            return Err(RegistryError::DuplicateComponent(def.id));
        }
        self.components.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &str) -> Option<Arc<ComponentDefinition>> {
        self.components.get(id).cloned()
    }

    /// All registered definition ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.components.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Compute the effective port tables for a definition under the given
    /// parameter values.
    ///
    /// Invokes the definition's optional hook and merges its result with
    /// the static shape. The hook may add ports but never remove or
    /// re-type a statically declared one; violations are rejected here so
    /// the compiler can rely on the merged tables.
    pub fn resolve_ports(
        &self,
        def: &ComponentDefinition,
        params: &JsonMap<String, Value>,
    ) -> Result<ResolvedPorts, RegistryError> {
        let mut resolved = ResolvedPorts {
            inputs: def.inputs.clone(),
            outputs: def.outputs.clone(),
        };
        let Some(hook) = &def.resolve_ports else {
            return Ok(resolved);
        };
        let dynamic = hook(params).map_err(|message| RegistryError::DynamicPorts {
            component: def.id.clone(),
            message,
        })?;
        merge_ports(&def.id, &mut resolved.inputs, dynamic.inputs)?;
        merge_ports(&def.id, &mut resolved.outputs, dynamic.outputs)?;
        Ok(resolved)
    }
}

/// Merge dynamically resolved ports into the static table, rejecting
/// contradictions of statically declared ports.
fn merge_ports(
    component: &str,
    table: &mut Vec<PortSpec>,
    dynamic: Vec<PortSpec>,
) -> Result<(), RegistryError> {
    for port in dynamic {
        match table.iter().find(|p| p.id == port.id) {
            None => table.push(port),
            Some(existing) if existing.port_type == port.port_type => {
                // Re-stating a static port with the same type is a no-op.
            }
            Some(existing) => {
                return Err(RegistryError::DynamicPorts {
                    component: component.to_string(),
                    message: format!(
                        "hook re-types static port '{}' from {} to {}",
                        port.id, existing.port_type, port.port_type
                    ),
                });
            }
        }
    }
    Ok(())
}
