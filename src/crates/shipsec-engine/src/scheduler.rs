//! Per-run scheduler: dependency-ready dispatch, fan-out families,
//! retries, suspension, and cancellation.
//!
//! One scheduler task owns each run's state; worker tasks invoke the
//! component runtime and report back over an event channel, so no state
//! is shared mutably across workers. Every state change is journaled
//! write-ahead through [`crate::transition`] before it is applied.
//!
//! The loop's shape: promote and dispatch everything that is ready,
//! then sleep on the next worker event, command, or timer. A run parks
//! (`AWAITING_INPUT`) when nothing is in flight and at least one
//! suspension is pending; it finalizes when every node is terminal or a
//! wind-down (failure or cancellation) has drained.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value};
use tokio::sync::{mpsc, oneshot, watch};

use shipsec_checkpoint::{RunJournal, TransitionRecord};
use shipsec_core::error::{ErrorKind, NodeError};
use shipsec_core::graph::JoinStrategy;
use shipsec_core::plan::{ExecutionPlan, PlanEdge, PlanNode};
use shipsec_core::port::{coerce, ValuePriority};
use shipsec_runtime::{
    CancelReason, CancellationToken, ComponentRuntime, InvocationRequest, Outcome,
    SuspensionKind, SuspensionRequest,
};

use crate::error::ResolveError;
use crate::run::{
    ChildSlot, FanoutRecord, NodeOutput, NodeStatus, RunRecord, RunStatus, SuspensionRecord,
    SuspensionStatus,
};
use crate::suspend::{generate_token, validate_resolution};
use crate::transition::{apply, Transition};

/// Commands accepted by a live run.
pub enum RunCommand {
    /// Request cooperative cancellation.
    Cancel,
    /// Resolve a parked suspension.
    Resolve {
        suspension_id: String,
        token: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), ResolveError>>,
    },
}

/// Options applied to one run.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tenant_id: String,
    /// Bound on concurrently running invocations across the run.
    pub max_concurrency: Option<usize>,
    /// Wall-clock deadline; expiry cancels the run.
    pub deadline: Option<Duration>,
    /// Grace period between the cancel signal and force-marking.
    pub grace_period: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            max_concurrency: None,
            deadline: None,
            grace_period: Duration::from_secs(30),
        }
    }
}

enum SchedulerEvent {
    Worker {
        node: usize,
        child: Option<usize>,
        attempt: u32,
        result: Result<Outcome, NodeError>,
    },
    RetryDue {
        node: usize,
        child: Option<usize>,
    },
    SuspensionTimeout {
        suspension_id: String,
    },
    GraceExpired,
    DeadlineExpired,
}

#[derive(Clone, Copy, PartialEq)]
enum WindDown {
    Failing,
    Cancelling,
}

enum Delivery {
    Ready(Value),
    Masked,
    NotReady,
}

enum Readiness {
    Ready,
    NotReady,
    AllMasked,
}

pub(crate) struct RunScheduler {
    run_id: String,
    plan: Arc<ExecutionPlan>,
    runtime: Arc<ComponentRuntime>,
    journal: Arc<dyn RunJournal>,
    state: Arc<RwLock<RunRecord>>,
    seq: u64,
    options: SchedulerOptions,
    cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    cmd_rx: mpsc::Receiver<RunCommand>,
    suspension_index: Arc<dashmap::DashMap<String, String>>,
    recovered: bool,

    in_flight: usize,
    pending_retries: usize,
    winding_down: Option<WindDown>,
    run_error: Option<String>,
    child_tokens: HashMap<(usize, usize), CancellationToken>,
    child_attempts: HashMap<(usize, usize), u32>,
    /// Fan-out element lists, keyed by node index: `(fan edge id, elements)`.
    child_inputs: HashMap<usize, (String, Vec<Value>)>,
    pending_children: HashMap<usize, VecDeque<usize>>,
    active_children: HashMap<usize, usize>,
}

#[allow(clippy::too_many_arguments)]
impl RunScheduler {
    pub(crate) fn new(
        run_id: String,
        plan: Arc<ExecutionPlan>,
        runtime: Arc<ComponentRuntime>,
        journal: Arc<dyn RunJournal>,
        state: Arc<RwLock<RunRecord>>,
        seq: u64,
        options: SchedulerOptions,
        cancel: CancellationToken,
        status_tx: watch::Sender<RunStatus>,
        cmd_rx: mpsc::Receiver<RunCommand>,
        suspension_index: Arc<dashmap::DashMap<String, String>>,
        recovered: bool,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            run_id,
            plan,
            runtime,
            journal,
            state,
            seq,
            options,
            cancel,
            status_tx,
            events_tx,
            events_rx,
            cmd_rx,
            suspension_index,
            recovered,
            in_flight: 0,
            pending_retries: 0,
            winding_down: None,
            run_error: None,
            child_tokens: HashMap::new(),
            child_attempts: HashMap::new(),
            child_inputs: HashMap::new(),
            pending_children: HashMap::new(),
            active_children: HashMap::new(),
        }
    }

    /// Drive the run to a terminal state.
    pub(crate) async fn run(mut self) {
        if self.state.read().status == RunStatus::Pending {
            self.transition(Transition::RunStatusChanged {
                status: RunStatus::Running,
                error: None,
            })
            .await;
        }

        if let Some(deadline) = self.options.deadline {
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let _ = tx.send(SchedulerEvent::DeadlineExpired);
            });
        }

        if self.recovered {
            self.redispatch_interrupted().await;
        }

        loop {
            self.pump().await;
            if self.state.read().status.is_terminal() {
                break;
            }
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => self.handle_command(cmd).await,
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                else => break,
            }
        }
        tracing::info!(
            run_id = %self.run_id,
            status = ?self.state.read().status,
            "run reached terminal state"
        );
    }

    // ------------------------------------------------------------------
    // Journal + state

    async fn transition(&mut self, transition: Transition) {
        let body = serde_json::to_value(&transition).expect("transition serializes");
        let record = TransitionRecord::new(&self.run_id, self.seq, body);
        if let Err(error) = self.journal.append(record).await {
            tracing::warn!(run_id = %self.run_id, %error, "journal append failed");
        }
        self.seq += 1;

        if let Transition::NodeTerminal {
            node,
            status: NodeStatus::Error,
            error: Some(error),
            ..
        } = &transition
        {
            if self.run_error.is_none() {
                self.run_error = Some(error.prefixed(node));
            }
        }

        let status = {
            let mut state = self.state.write();
            apply(&mut state, &transition);
            state.status
        };
        let _ = self.status_tx.send(status);
    }

    fn node_status(&self, idx: usize) -> NodeStatus {
        let state = self.state.read();
        state
            .nodes
            .get(&self.plan.nodes[idx].id)
            .map(|n| n.status)
            .unwrap_or_default()
    }

    fn node_attempt(&self, idx: usize) -> u32 {
        let state = self.state.read();
        state
            .nodes
            .get(&self.plan.nodes[idx].id)
            .map(|n| n.attempt)
            .unwrap_or(0)
    }

    fn capacity_available(&self) -> bool {
        self.options
            .max_concurrency
            .map(|max| self.in_flight < max)
            .unwrap_or(true)
    }

    // ------------------------------------------------------------------
    // Promotion and dispatch

    async fn pump(&mut self) {
        if self.state.read().status.is_terminal() {
            return;
        }

        if self.winding_down.is_none() {
            loop {
                let mut progressed = false;
                let order = self.plan.order.clone();
                for idx in order {
                    if self.node_status(idx) != NodeStatus::Idle {
                        continue;
                    }
                    match self.readiness(idx) {
                        Readiness::AllMasked => {
                            self.skip_node(idx).await;
                            progressed = true;
                        }
                        Readiness::Ready => {
                            if self.capacity_available() {
                                self.dispatch(idx).await;
                                progressed = true;
                            }
                        }
                        Readiness::NotReady => {}
                    }
                }
                if !progressed {
                    break;
                }
            }
            self.dispatch_queued_children().await;

            let has_error = {
                let state = self.state.read();
                state
                    .nodes
                    .values()
                    .any(|n| n.status == NodeStatus::Error)
            };
            if has_error && self.winding_down.is_none() {
                self.begin_wind_down(WindDown::Failing, CancelReason::RunFailing)
                    .await;
            }
        }

        self.check_completion().await;
    }

    fn readiness(&self, idx: usize) -> Readiness {
        let incoming: Vec<&PlanEdge> = self.plan.incoming(idx).collect();
        if incoming.is_empty() {
            return Readiness::Ready;
        }
        let mut any_live = false;
        for edge in incoming {
            match self.delivery(edge) {
                Delivery::Ready(_) => any_live = true,
                Delivery::Masked => {}
                Delivery::NotReady => return Readiness::NotReady,
            }
        }
        if any_live {
            Readiness::Ready
        } else {
            Readiness::AllMasked
        }
    }

    /// Raw delivered value for an edge (coercion applied at
    /// materialization, not here).
    fn delivery(&self, edge: &PlanEdge) -> Delivery {
        let source = &self.plan.nodes[edge.source];
        let state = self.state.read();
        let Some(record) = state.nodes.get(&source.id) else {
            return Delivery::NotReady;
        };
        match record.status {
            NodeStatus::Skipped => Delivery::Masked,
            NodeStatus::Success => {
                if let Some(children) = &record.children {
                    match aggregate_family(children, &edge.source_port) {
                        Some(value) => Delivery::Ready(value),
                        None => Delivery::Masked,
                    }
                } else {
                    match &record.output {
                        Some(NodeOutput::Outputs { outputs }) => Delivery::Ready(
                            outputs.get(&edge.source_port).cloned().unwrap_or(Value::Null),
                        ),
                        Some(NodeOutput::Branch { port, value }) => {
                            if *port == edge.source_port {
                                Delivery::Ready(value.clone())
                            } else {
                                Delivery::Masked
                            }
                        }
                        None => Delivery::Ready(Value::Null),
                    }
                }
            }
            _ => Delivery::NotReady,
        }
    }

    async fn skip_node(&mut self, idx: usize) {
        let node_id = self.plan.nodes[idx].id.clone();
        self.transition(Transition::NodeTerminal {
            node: node_id,
            status: NodeStatus::Skipped,
            output: None,
            error: None,
        })
        .await;
    }

    async fn dispatch(&mut self, idx: usize) {
        let fan_edge = self
            .plan
            .incoming(idx)
            .find(|e| e.fan_out && matches!(self.delivery(e), Delivery::Ready(_)))
            .cloned();
        match fan_edge {
            Some(edge) => self.dispatch_fanout(idx, edge).await,
            None => self.dispatch_single(idx).await,
        }
    }

    async fn dispatch_single(&mut self, idx: usize) {
        let node_id = self.plan.nodes[idx].id.clone();
        let attempt = self.node_attempt(idx) + 1;
        self.transition(Transition::NodeRunning {
            node: node_id,
            attempt,
        })
        .await;
        match self.materialize_inputs(idx, None) {
            Ok(inputs) => self.spawn_worker(idx, None, attempt, inputs),
            Err(error) => {
                self.handle_node_result(idx, attempt, Err(error)).await;
            }
        }
    }

    async fn dispatch_fanout(&mut self, idx: usize, edge: PlanEdge) {
        let node_id = self.plan.nodes[idx].id.clone();
        let Delivery::Ready(value) = self.delivery(&edge) else {
            return;
        };
        let elements = match value {
            Value::Array(items) => items,
            other => {
                let error = NodeError::validation(format!(
                    "fan-out input '{}' expected a list, got {}",
                    edge.target_port,
                    match other {
                        Value::Null => "null",
                        Value::Bool(_) => "boolean",
                        Value::Number(_) => "number",
                        Value::String(_) => "text",
                        Value::Object(_) => "object",
                        Value::Array(_) => unreachable!(),
                    }
                ));
                self.transition(Transition::NodeRunning {
                    node: node_id.clone(),
                    attempt: 1,
                })
                .await;
                self.transition(Transition::NodeTerminal {
                    node: node_id,
                    status: NodeStatus::Error,
                    output: None,
                    error: Some(error),
                })
                .await;
                return;
            }
        };

        let strategy = self.family_strategy(idx);
        let total = elements.len();
        self.transition(Transition::FanoutStarted {
            node: node_id.clone(),
            record: FanoutRecord::new(total, strategy),
        })
        .await;

        if total == 0 {
            // An empty family joins to the empty list for `all`; for
            // `any`/`first` there is no result and the subtree is
            // skipped.
            let status = match strategy {
                JoinStrategy::All => NodeStatus::Success,
                JoinStrategy::Any | JoinStrategy::First => NodeStatus::Skipped,
            };
            self.transition(Transition::NodeTerminal {
                node: node_id,
                status,
                output: None,
                error: None,
            })
            .await;
            return;
        }

        self.transition(Transition::NodeRunning {
            node: node_id,
            attempt: 1,
        })
        .await;
        self.child_inputs.insert(idx, (edge.id.clone(), elements));
        self.pending_children
            .insert(idx, (0..total).collect::<VecDeque<usize>>());
        self.active_children.insert(idx, 0);
        self.dispatch_queued_children().await;
    }

    /// Join strategy governing a fan-out family: the first downstream
    /// consumer (in plan order) that declares one, defaulting to `all`.
    fn family_strategy(&self, idx: usize) -> JoinStrategy {
        let mut targets: Vec<usize> = self.plan.outgoing(idx).map(|e| e.target).collect();
        targets.sort_by_key(|t| {
            self.plan
                .order
                .iter()
                .position(|&o| o == *t)
                .unwrap_or(usize::MAX)
        });
        targets
            .into_iter()
            .filter_map(|t| self.plan.nodes[t].join_strategy)
            .next()
            .unwrap_or_default()
    }

    async fn dispatch_queued_children(&mut self) {
        if self.winding_down.is_some() {
            return;
        }
        let nodes: Vec<usize> = self.pending_children.keys().copied().collect();
        for idx in nodes {
            let node_max = self.plan.nodes[idx].max_concurrency;
            loop {
                if !self.capacity_available() {
                    break;
                }
                let active = *self.active_children.get(&idx).unwrap_or(&0);
                if node_max.map(|max| active >= max).unwrap_or(false) {
                    break;
                }
                let winner_found = {
                    let state = self.state.read();
                    state
                        .nodes
                        .get(&self.plan.nodes[idx].id)
                        .and_then(|n| n.children.as_ref())
                        .and_then(|c| c.winner)
                        .is_some()
                };
                let Some(child) = self
                    .pending_children
                    .get_mut(&idx)
                    .and_then(|queue| queue.pop_front())
                else {
                    break;
                };
                if winner_found {
                    // The race is decided; queued children never start.
                    self.transition(Transition::ChildTerminal {
                        node: self.plan.nodes[idx].id.clone(),
                        index: child,
                        slot: ChildSlot::Cancelled,
                    })
                    .await;
                    self.check_family(idx).await;
                    continue;
                }
                self.dispatch_child(idx, child).await;
            }
        }
        self.pending_children.retain(|_, queue| !queue.is_empty());
    }

    async fn dispatch_child(&mut self, idx: usize, child: usize) {
        let attempt = self
            .child_attempts
            .entry((idx, child))
            .and_modify(|a| *a += 1)
            .or_insert(1);
        let attempt = *attempt;

        match self.materialize_inputs(idx, Some(child)) {
            Ok(inputs) => {
                let token = CancellationToken::new();
                self.child_tokens.insert((idx, child), token.clone());
                *self.active_children.entry(idx).or_insert(0) += 1;
                self.spawn_child_worker(idx, child, attempt, inputs, token);
            }
            Err(error) => {
                *self.active_children.entry(idx).or_insert(0) += 1;
                self.handle_child_result(idx, child, attempt, Err(error))
                    .await;
            }
        }
    }

    fn spawn_worker(
        &mut self,
        idx: usize,
        child: Option<usize>,
        attempt: u32,
        inputs: JsonMap<String, Value>,
    ) {
        let node = &self.plan.nodes[idx];
        let request = InvocationRequest {
            component: node.component.clone(),
            runner: node.runner.clone(),
            run_id: self.run_id.clone(),
            node_id: node.id.clone(),
            tenant_id: self.options.tenant_id.clone(),
            inputs,
            params: node.params.clone(),
            cancel: self.cancel.clone(),
        };
        self.spawn_invocation(idx, child, attempt, request);
    }

    fn spawn_child_worker(
        &mut self,
        idx: usize,
        child: usize,
        attempt: u32,
        inputs: JsonMap<String, Value>,
        token: CancellationToken,
    ) {
        let node = &self.plan.nodes[idx];
        let request = InvocationRequest {
            component: node.component.clone(),
            runner: node.runner.clone(),
            run_id: self.run_id.clone(),
            node_id: format!("{}#{}", node.id, child),
            tenant_id: self.options.tenant_id.clone(),
            inputs,
            params: node.params.clone(),
            cancel: token,
        };
        self.spawn_invocation(idx, Some(child), attempt, request);
    }

    fn spawn_invocation(
        &mut self,
        idx: usize,
        child: Option<usize>,
        attempt: u32,
        request: InvocationRequest,
    ) {
        self.in_flight += 1;
        let runtime = self.runtime.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = runtime.invoke(request).await;
            let _ = tx.send(SchedulerEvent::Worker {
                node: idx,
                child,
                attempt,
                result,
            });
        });
    }

    // ------------------------------------------------------------------
    // Input materialization

    fn materialize_inputs(
        &self,
        idx: usize,
        child: Option<usize>,
    ) -> Result<JsonMap<String, Value>, NodeError> {
        let node = &self.plan.nodes[idx];
        let is_entry = self.plan.entry.contains(&idx);
        let mut inputs = if is_entry {
            self.state.read().inputs.clone()
        } else {
            JsonMap::new()
        };

        let fan_edge_id = self.child_inputs.get(&idx).map(|(id, _)| id.clone());

        for port in &node.inputs {
            let mut edge_values: Vec<Value> = Vec::new();
            for edge in self.plan.incoming(idx).filter(|e| e.target_port == port.id) {
                if let (Some(child_index), Some(fan_id)) = (child, fan_edge_id.as_deref()) {
                    if edge.id == fan_id {
                        let (_, elements) = &self.child_inputs[&idx];
                        let element = elements
                            .get(child_index)
                            .cloned()
                            .unwrap_or(Value::Null);
                        let element = match &edge.coercion {
                            Some((from, to)) => coerce(&element, from, to)?,
                            None => element,
                        };
                        edge_values.push(element);
                        continue;
                    }
                }
                match self.delivery(edge) {
                    Delivery::Ready(value) => {
                        let value = match (&edge.coercion, edge.fan_out) {
                            (Some((from, to)), false) => coerce(&value, from, to)?,
                            _ => value,
                        };
                        edge_values.push(value);
                    }
                    Delivery::Masked => {}
                    Delivery::NotReady => {
                        return Err(NodeError::internal(format!(
                            "input '{}' dispatched before delivery",
                            port.id
                        )))
                    }
                }
            }

            let edge_value = if port.multi && !edge_values.is_empty() {
                Some(Value::Array(edge_values))
            } else {
                edge_values.into_iter().next()
            };
            let manual = node.input_overrides.get(&port.id).cloned();
            // A delivered null is still a delivered value; only an
            // absent delivery falls back to the manual side.
            let chosen = match port.value_priority {
                ValuePriority::ManualFirst => manual.or(edge_value),
                ValuePriority::ConnectionFirst => edge_value.or(manual),
            };
            match chosen {
                Some(value) => {
                    inputs.insert(port.id.clone(), value);
                }
                None => {
                    if port.required && !inputs.contains_key(&port.id) {
                        return Err(NodeError::validation(format!(
                            "required input '{}' has no value",
                            port.id
                        )));
                    }
                }
            }
        }

        Ok(inputs)
    }

    // ------------------------------------------------------------------
    // Event handling

    async fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Worker {
                node,
                child,
                attempt,
                result,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if self.state.read().status.is_terminal() {
                    return;
                }
                match child {
                    Some(index) => self.handle_child_result(node, index, attempt, result).await,
                    None => self.handle_node_result(node, attempt, result).await,
                }
            }
            SchedulerEvent::RetryDue { node, child } => {
                self.pending_retries = self.pending_retries.saturating_sub(1);
                if self.winding_down.is_some() || self.state.read().status.is_terminal() {
                    return;
                }
                match child {
                    Some(index) => self.dispatch_child(node, index).await,
                    None => {
                        if self.node_status(node) == NodeStatus::Waiting {
                            self.dispatch_single(node).await;
                        }
                    }
                }
            }
            SchedulerEvent::SuspensionTimeout { suspension_id } => {
                self.handle_suspension_timeout(&suspension_id).await;
            }
            SchedulerEvent::GraceExpired => {
                if self.winding_down.is_some() && !self.state.read().status.is_terminal() {
                    self.finalize_wind_down(true).await;
                }
            }
            SchedulerEvent::DeadlineExpired => {
                if !self.state.read().status.is_terminal() && self.winding_down.is_none() {
                    tracing::warn!(run_id = %self.run_id, "run deadline reached, cancelling");
                    self.begin_wind_down(WindDown::Cancelling, CancelReason::DeadlineExceeded)
                        .await;
                }
            }
        }
    }

    async fn handle_node_result(
        &mut self,
        idx: usize,
        attempt: u32,
        result: Result<Outcome, NodeError>,
    ) {
        let node_id = self.plan.nodes[idx].id.clone();
        if self.node_status(idx).is_terminal() {
            return;
        }
        match result {
            Ok(Outcome::Success { outputs }) => {
                self.transition(Transition::NodeTerminal {
                    node: node_id,
                    status: NodeStatus::Success,
                    output: Some(NodeOutput::Outputs { outputs }),
                    error: None,
                })
                .await;
            }
            Ok(Outcome::Branch { port, value }) => {
                self.transition(Transition::NodeTerminal {
                    node: node_id,
                    status: NodeStatus::Success,
                    output: Some(NodeOutput::Branch { port, value }),
                    error: None,
                })
                .await;
            }
            Ok(Outcome::Pending(request)) => {
                self.create_suspension(idx, None, request).await;
            }
            Err(error) if error.kind == ErrorKind::Cancelled => {
                self.transition(Transition::NodeTerminal {
                    node: node_id,
                    status: NodeStatus::Error,
                    output: None,
                    error: Some(error),
                })
                .await;
            }
            Err(error) => {
                let policy = &self.plan.nodes[idx].retry;
                if policy.allows_retry(error.kind, attempt) && self.winding_down.is_none() {
                    let mut delay = policy.delay_for(attempt);
                    if let Some(suggested) = error.retry_after_seconds {
                        delay = delay.max(Duration::from_secs(suggested));
                    }
                    tracing::debug!(
                        run_id = %self.run_id,
                        node = %node_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying failed attempt"
                    );
                    self.transition(Transition::NodeWaiting {
                        node: node_id,
                        attempt,
                    })
                    .await;
                    self.schedule_retry(idx, None, delay);
                } else {
                    self.transition(Transition::NodeTerminal {
                        node: node_id,
                        status: NodeStatus::Error,
                        output: None,
                        error: Some(error),
                    })
                    .await;
                }
            }
        }
    }

    async fn handle_child_result(
        &mut self,
        idx: usize,
        child: usize,
        attempt: u32,
        result: Result<Outcome, NodeError>,
    ) {
        let node_id = self.plan.nodes[idx].id.clone();
        self.child_tokens.remove(&(idx, child));
        if let Some(active) = self.active_children.get_mut(&idx) {
            *active = active.saturating_sub(1);
        }

        let slot_terminal = {
            let state = self.state.read();
            state
                .nodes
                .get(&node_id)
                .and_then(|n| n.children.as_ref())
                .and_then(|c| c.slots.get(child))
                .map(|s| s.is_terminal())
                .unwrap_or(true)
        };
        if slot_terminal {
            return;
        }

        let strategy = {
            let state = self.state.read();
            state
                .nodes
                .get(&node_id)
                .and_then(|n| n.children.as_ref())
                .map(|c| c.strategy)
                .unwrap_or_default()
        };

        match result {
            Ok(outcome) => match outcome {
                Outcome::Success { outputs } => {
                    self.transition(Transition::ChildTerminal {
                        node: node_id.clone(),
                        index: child,
                        slot: ChildSlot::Success { outputs },
                    })
                    .await;
                    if strategy == JoinStrategy::Any || strategy == JoinStrategy::First {
                        self.claim_winner(idx, child).await;
                    }
                }
                Outcome::Branch { port, value } => {
                    let mut outputs = JsonMap::new();
                    outputs.insert(port, value);
                    self.transition(Transition::ChildTerminal {
                        node: node_id.clone(),
                        index: child,
                        slot: ChildSlot::Success { outputs },
                    })
                    .await;
                    if strategy == JoinStrategy::Any || strategy == JoinStrategy::First {
                        self.claim_winner(idx, child).await;
                    }
                }
                Outcome::Pending(request) => {
                    self.create_suspension(idx, Some(child), request).await;
                    return;
                }
            },
            Err(error) if error.kind == ErrorKind::Cancelled => {
                self.transition(Transition::ChildTerminal {
                    node: node_id.clone(),
                    index: child,
                    slot: ChildSlot::Cancelled,
                })
                .await;
            }
            Err(error) => {
                let policy = &self.plan.nodes[idx].retry;
                if policy.allows_retry(error.kind, attempt) && self.winding_down.is_none() {
                    let mut delay = policy.delay_for(attempt);
                    if let Some(suggested) = error.retry_after_seconds {
                        delay = delay.max(Duration::from_secs(suggested));
                    }
                    self.schedule_retry(idx, Some(child), delay);
                    return;
                }
                self.transition(Transition::ChildTerminal {
                    node: node_id.clone(),
                    index: child,
                    slot: ChildSlot::Failed { error },
                })
                .await;
                if strategy == JoinStrategy::First {
                    self.claim_winner(idx, child).await;
                }
            }
        }

        self.check_family(idx).await;
    }

    /// Record the winning child of an `any`/`first` join and cancel the
    /// losing siblings. The family result is delivered only once every
    /// sibling has acknowledged, so cancellation completes before the
    /// join emits.
    async fn claim_winner(&mut self, idx: usize, child: usize) {
        let node_id = self.plan.nodes[idx].id.clone();
        let already_decided = {
            let state = self.state.read();
            state
                .nodes
                .get(&node_id)
                .and_then(|n| n.children.as_ref())
                .and_then(|c| c.winner)
                .is_some()
        };
        if already_decided {
            return;
        }
        self.transition(Transition::FanoutWinner {
            node: node_id.clone(),
            index: child,
        })
        .await;

        // Cancel running siblings...
        for ((node, _), token) in self.child_tokens.iter().filter(|((n, _), _)| *n == idx) {
            let _ = node;
            token.cancel_with(CancelReason::LostRace);
        }
        // ...and mark queued ones that never started.
        if let Some(queue) = self.pending_children.remove(&idx) {
            for index in queue {
                self.transition(Transition::ChildTerminal {
                    node: node_id.clone(),
                    index,
                    slot: ChildSlot::Cancelled,
                })
                .await;
            }
        }
    }

    async fn check_family(&mut self, idx: usize) {
        let node_id = self.plan.nodes[idx].id.clone();
        let family = {
            let state = self.state.read();
            state
                .nodes
                .get(&node_id)
                .filter(|n| !n.status.is_terminal())
                .and_then(|n| n.children.clone())
        };
        let Some(family) = family else {
            return;
        };
        if !family.all_terminal() {
            return;
        }

        let first_failure = family.slots.iter().find_map(|slot| match slot {
            ChildSlot::Failed { error } => Some(error.clone()),
            _ => None,
        });

        let all_succeeded = family
            .slots
            .iter()
            .all(|slot| matches!(slot, ChildSlot::Success { .. }));

        let terminal = match family.strategy {
            JoinStrategy::All => match first_failure {
                Some(error) => (NodeStatus::Error, Some(error)),
                None if all_succeeded => (NodeStatus::Success, None),
                None => (
                    NodeStatus::Error,
                    Some(NodeError::new(
                        ErrorKind::Cancelled,
                        "fan-out children cancelled",
                    )),
                ),
            },
            JoinStrategy::Any => match family.winner {
                Some(_) => (NodeStatus::Success, None),
                None => (
                    NodeStatus::Error,
                    Some(first_failure.unwrap_or_else(|| {
                        NodeError::new(ErrorKind::Cancelled, "all fan-out children cancelled")
                    })),
                ),
            },
            JoinStrategy::First => match family.winner {
                Some(winner) => match &family.slots[winner] {
                    ChildSlot::Success { .. } => (NodeStatus::Success, None),
                    ChildSlot::Failed { error } => (NodeStatus::Error, Some(error.clone())),
                    _ => (
                        NodeStatus::Error,
                        Some(NodeError::new(ErrorKind::Cancelled, "winning child cancelled")),
                    ),
                },
                None => (
                    NodeStatus::Error,
                    Some(first_failure.unwrap_or_else(|| {
                        NodeError::new(ErrorKind::Cancelled, "all fan-out children cancelled")
                    })),
                ),
            },
        };

        self.child_inputs.remove(&idx);
        self.pending_children.remove(&idx);
        self.transition(Transition::NodeTerminal {
            node: node_id,
            status: terminal.0,
            output: None,
            error: terminal.1,
        })
        .await;
    }

    fn schedule_retry(&mut self, idx: usize, child: Option<usize>, delay: Duration) {
        self.pending_retries += 1;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SchedulerEvent::RetryDue { node: idx, child });
        });
    }

    // ------------------------------------------------------------------
    // Suspensions

    async fn create_suspension(
        &mut self,
        idx: usize,
        child: Option<usize>,
        request: SuspensionRequest,
    ) {
        let node_id = self.plan.nodes[idx].id.clone();
        if self.winding_down.is_some() {
            // The run is draining; a fresh park would never resolve.
            let error = NodeError::new(ErrorKind::Cancelled, "cancelled before suspension");
            match child {
                Some(index) => {
                    self.transition(Transition::ChildTerminal {
                        node: node_id,
                        index,
                        slot: ChildSlot::Cancelled,
                    })
                    .await;
                    let _ = error;
                }
                None => {
                    self.transition(Transition::NodeTerminal {
                        node: node_id,
                        status: NodeStatus::Error,
                        output: None,
                        error: Some(error),
                    })
                    .await;
                }
            }
            return;
        }
        let record = SuspensionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            node_id: node_id.clone(),
            child,
            kind: request.kind,
            title: request.title,
            description: request.description,
            input_schema: request.input_schema,
            context: request.context,
            timeout_at: request.timeout_at,
            token: generate_token(),
            status: SuspensionStatus::Pending,
            created_at: chrono::Utc::now(),
        };
        let suspension_id = record.id.clone();
        let timeout_at = record.timeout_at;

        self.suspension_index
            .insert(suspension_id.clone(), self.run_id.clone());
        self.transition(Transition::SuspensionCreated { record }).await;
        self.transition(Transition::NodeAwaitingInput { node: node_id })
            .await;

        if let Some(at) = timeout_at {
            let delay = (at - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(SchedulerEvent::SuspensionTimeout { suspension_id });
            });
        }
    }

    async fn handle_suspension_timeout(&mut self, suspension_id: &str) {
        let record = {
            let state = self.state.read();
            state.suspensions.get(suspension_id).cloned()
        };
        let Some(record) = record else { return };
        if record.status != SuspensionStatus::Pending {
            return;
        }

        if record.kind == SuspensionKind::Timer {
            // Timer expiry is the success path for wait nodes.
            self.apply_resolution(record, serde_json::json!({"elapsed": true}))
                .await;
            return;
        }

        self.transition(Transition::SuspensionStatusChanged {
            id: suspension_id.to_string(),
            status: SuspensionStatus::Expired,
        })
        .await;
        let error = NodeError::new(
            ErrorKind::TimedOut,
            format!("suspension '{}' timed out", record.title),
        );
        match record.child {
            Some(index) => {
                let idx = self
                    .plan
                    .node_index(&record.node_id)
                    .expect("plan node for suspension");
                self.transition(Transition::ChildTerminal {
                    node: record.node_id.clone(),
                    index,
                    slot: ChildSlot::Failed { error },
                })
                .await;
                self.check_family(idx).await;
            }
            None => {
                self.transition(Transition::NodeTerminal {
                    node: record.node_id.clone(),
                    status: NodeStatus::Error,
                    output: None,
                    error: Some(error),
                })
                .await;
            }
        }
    }

    async fn handle_command(&mut self, command: RunCommand) {
        match command {
            RunCommand::Cancel => {
                if self.state.read().status.is_terminal() || self.winding_down.is_some() {
                    return;
                }
                self.begin_wind_down(WindDown::Cancelling, CancelReason::RunCancelled)
                    .await;
            }
            RunCommand::Resolve {
                suspension_id,
                token,
                payload,
                reply,
            } => {
                let result = self.resolve(&suspension_id, &token, payload).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn resolve(
        &mut self,
        suspension_id: &str,
        token: &str,
        payload: Value,
    ) -> Result<(), ResolveError> {
        let record = {
            let state = self.state.read();
            state.suspensions.get(suspension_id).cloned()
        };
        let Some(record) = record else {
            return Err(ResolveError::NotFound(suspension_id.to_string()));
        };
        validate_resolution(&record, token, &payload)?;
        self.apply_resolution(record, payload).await;
        Ok(())
    }

    /// Consume the suspension and advance the owning node.
    async fn apply_resolution(&mut self, record: SuspensionRecord, payload: Value) {
        self.transition(Transition::SuspensionResolved {
            id: record.id.clone(),
            payload: payload.clone(),
        })
        .await;

        let Some(idx) = self.plan.node_index(&record.node_id) else {
            return;
        };
        let node = &self.plan.nodes[idx];

        match record.child {
            Some(index) => {
                let outputs = resolution_outputs(node, record.kind, payload);
                self.transition(Transition::ChildTerminal {
                    node: record.node_id.clone(),
                    index,
                    slot: ChildSlot::Success { outputs },
                })
                .await;
                self.check_family(idx).await;
            }
            None => {
                if record.kind == SuspensionKind::Approval && !node.branching_outputs.is_empty() {
                    let approved = payload
                        .get("approved")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let wanted = if approved { "approved" } else { "rejected" };
                    let port = node
                        .branching_outputs
                        .iter()
                        .find(|p| p.as_str() == wanted)
                        .cloned()
                        .unwrap_or_else(|| node.branching_outputs[0].clone());
                    self.transition(Transition::NodeTerminal {
                        node: record.node_id.clone(),
                        status: NodeStatus::Success,
                        output: Some(NodeOutput::Branch {
                            port,
                            value: payload,
                        }),
                        error: None,
                    })
                    .await;
                } else {
                    let outputs = resolution_outputs(node, record.kind, payload);
                    self.transition(Transition::NodeTerminal {
                        node: record.node_id.clone(),
                        status: NodeStatus::Success,
                        output: Some(NodeOutput::Outputs { outputs }),
                        error: None,
                    })
                    .await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Wind-down and completion

    async fn begin_wind_down(&mut self, kind: WindDown, reason: CancelReason) {
        self.winding_down = Some(kind);
        self.cancel.cancel_with(reason);
        for token in self.child_tokens.values() {
            token.cancel_with(reason);
        }

        let pending: Vec<String> = {
            let state = self.state.read();
            state
                .suspensions
                .values()
                .filter(|s| s.status == SuspensionStatus::Pending)
                .map(|s| s.id.clone())
                .collect()
        };
        for id in pending {
            self.transition(Transition::SuspensionStatusChanged {
                id,
                status: SuspensionStatus::Cancelled,
            })
            .await;
        }

        let tx = self.events_tx.clone();
        let grace = self.options.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(SchedulerEvent::GraceExpired);
        });
    }

    async fn check_completion(&mut self) {
        if self.state.read().status.is_terminal() {
            return;
        }

        if self.winding_down.is_some() {
            if self.in_flight == 0 {
                self.finalize_wind_down(false).await;
            }
            return;
        }

        let (all_terminal, any_error, pending_suspensions) = {
            let state = self.state.read();
            (
                state.nodes.values().all(|n| n.status.is_terminal()),
                state.nodes.values().any(|n| n.status == NodeStatus::Error),
                !state.pending_suspensions().is_empty(),
            )
        };

        if all_terminal {
            let (status, error) = if any_error {
                (RunStatus::Failed, self.run_error.clone())
            } else {
                (RunStatus::Completed, None)
            };
            self.transition(Transition::RunStatusChanged { status, error })
                .await;
            return;
        }

        if self.in_flight == 0 && self.pending_retries == 0 {
            if pending_suspensions {
                if self.state.read().status != RunStatus::AwaitingInput {
                    self.transition(Transition::RunStatusChanged {
                        status: RunStatus::AwaitingInput,
                        error: None,
                    })
                    .await;
                }
            } else {
                // Nothing can make progress and nothing is parked.
                self.transition(Transition::RunStatusChanged {
                    status: RunStatus::Failed,
                    error: Some("scheduler stalled with no progressable node".to_string()),
                })
                .await;
            }
        } else if self.state.read().status == RunStatus::AwaitingInput {
            self.transition(Transition::RunStatusChanged {
                status: RunStatus::Running,
                error: None,
            })
            .await;
        }
    }

    /// Finalize a failing or cancelling run once workers drained (or the
    /// grace period forced it).
    async fn finalize_wind_down(&mut self, forced: bool) {
        let kind = self.winding_down.expect("wind-down in progress");
        let leftovers: Vec<(String, NodeStatus)> = {
            let state = self.state.read();
            state
                .nodes
                .iter()
                .filter(|(_, n)| !n.status.is_terminal())
                .map(|(id, n)| (id.clone(), n.status))
                .collect()
        };
        for (node, status) in leftovers {
            let terminal = match status {
                NodeStatus::Idle | NodeStatus::Waiting => {
                    (NodeStatus::Skipped, None)
                }
                _ => (
                    NodeStatus::Error,
                    Some(NodeError::new(
                        ErrorKind::Cancelled,
                        if forced {
                            "cancelled after grace period"
                        } else {
                            "cancelled"
                        },
                    )),
                ),
            };
            self.transition(Transition::NodeTerminal {
                node,
                status: terminal.0,
                output: None,
                error: terminal.1,
            })
            .await;
        }

        let (status, error) = match kind {
            WindDown::Cancelling => (RunStatus::Cancelled, None),
            WindDown::Failing => (RunStatus::Failed, self.run_error.clone()),
        };
        self.transition(Transition::RunStatusChanged { status, error })
            .await;
    }

    // ------------------------------------------------------------------
    // Recovery

    /// Re-dispatch work that was in flight when the engine stopped.
    ///
    /// A lost dispatch consumes a retry slot: the node re-runs as a
    /// fresh attempt if its budget allows, and fails otherwise. Parked
    /// suspensions stay parked, with their timeout timers re-armed.
    async fn redispatch_interrupted(&mut self) {
        let nodes: Vec<(usize, NodeStatus, u32, Option<NodeError>, bool)> = {
            let state = self.state.read();
            self.plan
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(idx, node)| {
                    state.nodes.get(&node.id).map(|record| {
                        (
                            idx,
                            record.status,
                            record.attempt,
                            record.last_error.clone(),
                            record.children.is_some(),
                        )
                    })
                })
                .collect()
        };

        for (idx, status, attempt, last_error, fanned) in nodes {
            match status {
                NodeStatus::Running | NodeStatus::Waiting => {
                    let node_id = self.plan.nodes[idx].id.clone();
                    if fanned {
                        self.requeue_family(idx).await;
                        continue;
                    }
                    let policy = &self.plan.nodes[idx].retry;
                    if attempt + 1 > policy.max_attempts {
                        let error = last_error.unwrap_or_else(|| {
                            NodeError::internal("dispatch lost after final attempt")
                        });
                        self.transition(Transition::NodeTerminal {
                            node: node_id,
                            status: NodeStatus::Error,
                            output: None,
                            error: Some(error),
                        })
                        .await;
                    } else {
                        self.dispatch_single(idx).await;
                    }
                }
                NodeStatus::AwaitingInput => {
                    let pending: Vec<SuspensionRecord> = {
                        let state = self.state.read();
                        state
                            .suspensions
                            .values()
                            .filter(|s| {
                                s.status == SuspensionStatus::Pending
                                    && s.node_id == self.plan.nodes[idx].id
                            })
                            .cloned()
                            .collect()
                    };
                    for record in pending {
                        self.suspension_index
                            .insert(record.id.clone(), self.run_id.clone());
                        if let Some(at) = record.timeout_at {
                            let delay =
                                (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
                            let tx = self.events_tx.clone();
                            let id = record.id.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send(SchedulerEvent::SuspensionTimeout {
                                    suspension_id: id,
                                });
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Rebuild a fan-out family's element list and queue its unfinished
    /// children again.
    async fn requeue_family(&mut self, idx: usize) {
        let Some(edge) = self
            .plan
            .incoming(idx)
            .find(|e| e.fan_out)
            .cloned()
        else {
            return;
        };
        let Delivery::Ready(Value::Array(elements)) = self.delivery(&edge) else {
            return;
        };
        let unfinished: VecDeque<usize> = {
            let state = self.state.read();
            state
                .nodes
                .get(&self.plan.nodes[idx].id)
                .and_then(|n| n.children.as_ref())
                .map(|family| {
                    family
                        .slots
                        .iter()
                        .enumerate()
                        .filter(|(_, slot)| !slot.is_terminal())
                        .map(|(i, _)| i)
                        .collect()
                })
                .unwrap_or_default()
        };
        if unfinished.is_empty() {
            self.check_family(idx).await;
            return;
        }
        self.child_inputs.insert(idx, (edge.id.clone(), elements));
        self.pending_children.insert(idx, unfinished);
        self.active_children.insert(idx, 0);
    }
}

/// Aggregate a completed fan-out family for one downstream edge.
/// `None` means the edge is masked (an `any`/`first` family with no
/// winner).
fn aggregate_family(family: &FanoutRecord, port: &str) -> Option<Value> {
    match family.strategy {
        JoinStrategy::All => Some(Value::Array(
            family
                .slots
                .iter()
                .map(|slot| match slot {
                    ChildSlot::Success { outputs } => {
                        outputs.get(port).cloned().unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                })
                .collect(),
        )),
        JoinStrategy::Any | JoinStrategy::First => {
            family.winner.and_then(|winner| match &family.slots[winner] {
                ChildSlot::Success { outputs } => {
                    Some(outputs.get(port).cloned().unwrap_or(Value::Null))
                }
                _ => None,
            })
        }
    }
}

/// Map a resolution payload onto a node's output table.
fn resolution_outputs(
    node: &PlanNode,
    kind: SuspensionKind,
    payload: Value,
) -> JsonMap<String, Value> {
    let mut outputs = JsonMap::new();
    if kind == SuspensionKind::Timer {
        outputs.insert("elapsed".to_string(), Value::Bool(true));
        return outputs;
    }
    let port = node
        .outputs
        .iter()
        .find(|o| !o.is_branching)
        .map(|o| o.id.clone())
        .unwrap_or_else(|| "data".to_string());
    outputs.insert(port, payload);
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::FanoutRecord;
    use serde_json::json;

    fn family_with(slots: Vec<ChildSlot>, strategy: JoinStrategy) -> FanoutRecord {
        let mut family = FanoutRecord::new(slots.len(), strategy);
        family.slots = slots;
        family
    }

    fn success(value: Value) -> ChildSlot {
        let mut outputs = JsonMap::new();
        outputs.insert("value".to_string(), value);
        ChildSlot::Success { outputs }
    }

    #[test]
    fn test_aggregate_all_preserves_source_order() {
        let family = family_with(
            vec![success(json!("A")), success(json!("B")), success(json!("C"))],
            JoinStrategy::All,
        );
        assert_eq!(
            aggregate_family(&family, "value"),
            Some(json!(["A", "B", "C"]))
        );
    }

    #[test]
    fn test_aggregate_any_uses_winner() {
        let mut family = family_with(
            vec![ChildSlot::Cancelled, success(json!("winner"))],
            JoinStrategy::Any,
        );
        family.winner = Some(1);
        assert_eq!(aggregate_family(&family, "value"), Some(json!("winner")));

        family.winner = None;
        assert_eq!(aggregate_family(&family, "value"), None);
    }

    #[test]
    fn test_aggregate_empty_all_is_empty_list() {
        let family = FanoutRecord::new(0, JoinStrategy::All);
        assert_eq!(aggregate_family(&family, "value"), Some(json!([])));
    }

    #[test]
    fn test_resolution_outputs_prefers_declared_port() {
        use shipsec_core::component::{PortSpec, RetryPolicy, RunnerKind};
        use shipsec_core::port::PortType;
        let node = PlanNode {
            id: "form".to_string(),
            component: "human.form".to_string(),
            runner: RunnerKind::Inline,
            inputs: vec![],
            outputs: vec![PortSpec::new("data", PortType::Json)],
            params: JsonMap::new(),
            input_overrides: JsonMap::new(),
            join_strategy: None,
            max_concurrency: None,
            retry: RetryPolicy::none(),
            branching_outputs: vec![],
        };
        let outputs = resolution_outputs(&node, SuspensionKind::Form, json!({"severity": "high"}));
        assert_eq!(outputs["data"], json!({"severity": "high"}));

        let outputs = resolution_outputs(&node, SuspensionKind::Timer, json!({}));
        assert_eq!(outputs["elapsed"], json!(true));
    }
}
