//! The engine facade: run lifecycle, triggers, resumption, recovery.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use shipsec_checkpoint::{RunJournal, TransitionRecord};
use shipsec_core::plan::ExecutionPlan;
use shipsec_runtime::{CancellationToken, ComponentRuntime};

use crate::error::{EngineError, ResolveError};
use crate::run::{RunRecord, RunStatus, TriggerInfo};
use crate::scheduler::{RunCommand, RunScheduler, SchedulerOptions};
use crate::transition::{replay, Transition};

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tenant runs execute under when the trigger names none.
    pub tenant_id: String,
    /// Grace period between a cancel signal and force-marking.
    pub grace_period: Duration,
    /// Default bound on concurrently running invocations per run.
    pub default_max_concurrency: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            grace_period: Duration::from_secs(30),
            default_max_concurrency: None,
        }
    }
}

/// Per-run overrides supplied at trigger time.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Bound on concurrently running invocations across the run.
    pub max_concurrency: Option<usize>,
    /// Wall-clock deadline; expiry cancels the run.
    pub deadline: Option<Duration>,
}

struct RunHandle {
    state: Arc<RwLock<RunRecord>>,
    cmd_tx: mpsc::Sender<RunCommand>,
    status_rx: watch::Receiver<RunStatus>,
    #[allow(dead_code)]
    cancel: CancellationToken,
}

/// The durable workflow execution engine.
///
/// Owns one scheduler task per live run; queries read the shared run
/// record, commands flow over each run's channel. Cloning shares the
/// engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    runtime: Arc<ComponentRuntime>,
    journal: Arc<dyn RunJournal>,
    config: EngineConfig,
    runs: DashMap<String, RunHandle>,
    suspension_index: Arc<DashMap<String, String>>,
}

impl Engine {
    /// An engine over the given runtime and journal with default
    /// configuration.
    pub fn new(runtime: Arc<ComponentRuntime>, journal: Arc<dyn RunJournal>) -> Self {
        Self::with_config(runtime, journal, EngineConfig::default())
    }

    /// An engine with explicit configuration.
    pub fn with_config(
        runtime: Arc<ComponentRuntime>,
        journal: Arc<dyn RunJournal>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                runtime,
                journal,
                config,
                runs: DashMap::new(),
                suspension_index: Arc::new(DashMap::new()),
            }),
        }
    }

    /// Materialize a new run from a trigger and start scheduling it.
    ///
    /// The run binds to the plan's content hash for its lifetime; entry
    /// nodes are seeded from `inputs`.
    pub async fn start_run(
        &self,
        plan: Arc<ExecutionPlan>,
        inputs: JsonMap<String, Value>,
        trigger: TriggerInfo,
        options: RunOptions,
    ) -> Result<String, EngineError> {
        let run_id = format!("run-{}", Uuid::new_v4());
        let record = RunRecord::new(
            run_id.clone(),
            plan.workflow_id.clone(),
            plan.hash.clone(),
            self.inner.config.tenant_id.clone(),
            trigger,
            inputs,
            plan.nodes.iter().map(|n| n.id.clone()),
        );

        let seed = Transition::RunCreated {
            record: record.clone(),
        };
        self.inner
            .journal
            .append(TransitionRecord::new(
                &run_id,
                0,
                serde_json::to_value(&seed).expect("transition serializes"),
            ))
            .await?;

        self.spawn_scheduler(run_id.clone(), plan, record, 1, options, false);
        Ok(run_id)
    }

    /// Reconstruct a run from its journal and, when it is not yet
    /// terminal, resume scheduling it. Lost dispatches re-run as fresh
    /// attempts within the retry budget; parked suspensions stay parked.
    pub async fn recover_run(
        &self,
        run_id: &str,
        plan: Arc<ExecutionPlan>,
    ) -> Result<RunStatus, EngineError> {
        let records = self.inner.journal.load(run_id).await?;
        let (record, next_seq) = replay(run_id, &records)?;
        let status = record.status;

        if status.is_terminal() {
            // Register for queries only.
            let (cmd_tx, _cmd_rx) = mpsc::channel(1);
            let (status_tx, status_rx) = watch::channel(status);
            let _ = status_tx;
            self.inner.runs.insert(
                run_id.to_string(),
                RunHandle {
                    state: Arc::new(RwLock::new(record)),
                    cmd_tx,
                    status_rx,
                    cancel: CancellationToken::new(),
                },
            );
            return Ok(status);
        }

        self.spawn_scheduler(
            run_id.to_string(),
            plan,
            record,
            next_seq,
            RunOptions::default(),
            true,
        );
        Ok(status)
    }

    fn spawn_scheduler(
        &self,
        run_id: String,
        plan: Arc<ExecutionPlan>,
        record: RunRecord,
        seq: u64,
        options: RunOptions,
        recovered: bool,
    ) {
        let state = Arc::new(RwLock::new(record));
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(state.read().status);

        let scheduler_options = SchedulerOptions {
            tenant_id: self.inner.config.tenant_id.clone(),
            max_concurrency: options
                .max_concurrency
                .or(self.inner.config.default_max_concurrency),
            deadline: options.deadline,
            grace_period: self.inner.config.grace_period,
        };
        let scheduler = RunScheduler::new(
            run_id.clone(),
            plan,
            self.inner.runtime.clone(),
            self.inner.journal.clone(),
            state.clone(),
            seq,
            scheduler_options,
            cancel.clone(),
            status_tx,
            cmd_rx,
            self.inner.suspension_index.clone(),
            recovered,
        );

        self.inner.runs.insert(
            run_id,
            RunHandle {
                state,
                cmd_tx,
                status_rx,
                cancel,
            },
        );
        tokio::spawn(scheduler.run());
    }

    /// Snapshot of a run's record.
    pub fn run_state(&self, run_id: &str) -> Option<RunRecord> {
        self.inner.runs.get(run_id).map(|h| h.state.read().clone())
    }

    /// Request cooperative cancellation. Cancelling a terminal run is a
    /// no-op.
    pub async fn cancel_run(&self, run_id: &str) -> Result<(), EngineError> {
        let cmd_tx = {
            let handle = self
                .inner
                .runs
                .get(run_id)
                .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?;
            if handle.state.read().status.is_terminal() {
                return Ok(());
            }
            handle.cmd_tx.clone()
        };
        cmd_tx
            .send(RunCommand::Cancel)
            .await
            .map_err(|_| EngineError::SchedulerGone(run_id.to_string()))
    }

    /// Resolve a parked suspension through the typed resumption channel.
    pub async fn resolve_suspension(
        &self,
        suspension_id: &str,
        token: &str,
        payload: Value,
    ) -> Result<(), EngineError> {
        let run_id = self
            .inner
            .suspension_index
            .get(suspension_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ResolveError::NotFound(suspension_id.to_string()))?;
        let handle = self
            .inner
            .runs
            .get(&run_id)
            .ok_or_else(|| EngineError::UnknownRun(run_id.clone()))?;

        // A finished run has no live scheduler; answer from the record
        // so a duplicate resolution still reads as AlreadyResolved.
        {
            let state = handle.state.read();
            let record = state
                .suspensions
                .get(suspension_id)
                .ok_or_else(|| ResolveError::NotFound(suspension_id.to_string()))?;
            match record.status {
                crate::run::SuspensionStatus::Resolved => {
                    return Err(ResolveError::AlreadyResolved(suspension_id.to_string()).into())
                }
                crate::run::SuspensionStatus::Expired
                | crate::run::SuspensionStatus::Cancelled => {
                    return Err(ResolveError::Revoked(suspension_id.to_string()).into())
                }
                crate::run::SuspensionStatus::Pending => {
                    if state.status.is_terminal() {
                        return Err(ResolveError::Revoked(suspension_id.to_string()).into());
                    }
                }
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = RunCommand::Resolve {
            suspension_id: suspension_id.to_string(),
            token: token.to_string(),
            payload,
            reply: reply_tx,
        };
        let cmd_tx = handle.cmd_tx.clone();
        drop(handle);
        cmd_tx
            .send(command)
            .await
            .map_err(|_| EngineError::SchedulerGone(run_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::SchedulerGone(run_id))?
            .map_err(EngineError::from)
    }

    /// Run id owning a suspension, when the engine knows it.
    pub fn run_for_suspension(&self, suspension_id: &str) -> Option<String> {
        self.inner
            .suspension_index
            .get(suspension_id)
            .map(|entry| entry.value().clone())
    }

    /// Block until the run leaves non-terminal states and return the
    /// terminal status.
    pub async fn wait_until_terminal(&self, run_id: &str) -> Result<RunStatus, EngineError> {
        let mut status_rx = {
            let handle = self
                .inner
                .runs
                .get(run_id)
                .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?;
            handle.status_rx.clone()
        };
        loop {
            let status = *status_rx.borrow();
            if status.is_terminal() {
                return Ok(status);
            }
            if status_rx.changed().await.is_err() {
                let status = self
                    .run_state(run_id)
                    .map(|r| r.status)
                    .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?;
                return Ok(status);
            }
        }
    }

    /// Block until the run reaches the given status (terminal states
    /// also end the wait).
    pub async fn wait_for_status(
        &self,
        run_id: &str,
        wanted: RunStatus,
    ) -> Result<RunStatus, EngineError> {
        let mut status_rx = {
            let handle = self
                .inner
                .runs
                .get(run_id)
                .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?;
            handle.status_rx.clone()
        };
        loop {
            let status = *status_rx.borrow();
            if status == wanted || status.is_terminal() {
                return Ok(status);
            }
            if status_rx.changed().await.is_err() {
                return Ok(*status_rx.borrow());
            }
        }
    }

    /// The journal backing this engine.
    pub fn journal(&self) -> Arc<dyn RunJournal> {
        self.inner.journal.clone()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("runs", &self.inner.runs.len())
            .field("tenant_id", &self.inner.config.tenant_id)
            .finish()
    }
}
