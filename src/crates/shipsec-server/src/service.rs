//! Application state and workflow service operations.
//!
//! API handlers stay thin; everything that touches more than one store
//! (database, engine, registries) lives here.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value};
use thiserror::Error;

use shipsec_core::compiler::{compile, CompileReport};
use shipsec_core::component::ComponentRegistry;
use shipsec_core::graph::Graph;
use shipsec_core::plan::ExecutionPlan;
use shipsec_core::port::ContractRegistry;
use shipsec_engine::{Engine, EngineError, RunOptions, RunRecord, TriggerInfo};
use shipsec_runtime::SuspensionKind;

use crate::config::ShipsecConfig;
use crate::db::models::{RunRow, WorkflowRow, WorkflowVersionRow};
use crate::db::repositories::{
    RunRepository, VersionRepository, WebhookRepository, WorkflowRepository,
};
use crate::db::{DatabaseError, DatabasePool};
use crate::webhook::{
    evaluate_rules, runtime_input_schema, validate_inputs, MappingRule, WebhookError,
};

/// Failures surfaced by the service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Db(#[from] DatabaseError),

    #[error("{0}")]
    Compile(CompileReport),

    #[error("{0} not found")]
    NotFound(String),

    #[error("workflow '{0}' has no committed version")]
    NoCommittedVersion(String),

    #[error("invalid graph document: {0}")]
    InvalidGraph(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub engine: Engine,
    pub registry: Arc<ComponentRegistry>,
    pub contracts: Arc<ContractRegistry>,
    pub config: ShipsecConfig,
}

impl AppState {
    /// Create a workflow with an optional initial draft graph.
    pub async fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
        graph: Option<Graph>,
    ) -> Result<WorkflowRow, ServiceError> {
        let draft = match graph {
            Some(graph) => serde_json::to_string(&graph).map_err(DatabaseError::from)?,
            None => serde_json::to_string(&Graph::new("", name)).map_err(DatabaseError::from)?,
        };
        Ok(WorkflowRepository::create(&self.pool, name, description, &draft).await?)
    }

    /// Replace a workflow's authoring draft.
    pub async fn update_draft(&self, id: &str, graph: Graph) -> Result<(), ServiceError> {
        let draft = serde_json::to_string(&graph).map_err(DatabaseError::from)?;
        if !WorkflowRepository::update_draft(&self.pool, id, &draft).await? {
            return Err(ServiceError::NotFound(format!("workflow '{}'", id)));
        }
        Ok(())
    }

    /// Compile the draft and freeze a new plan version.
    ///
    /// Committing an unchanged graph is idempotent: the existing version
    /// is found by content hash and the current-version pointer simply
    /// re-points at it.
    pub async fn commit(&self, id: &str) -> Result<WorkflowVersionRow, ServiceError> {
        let workflow = WorkflowRepository::get(&self.pool, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("workflow '{}'", id)))?;
        let mut graph: Graph = serde_json::from_str(&workflow.draft_graph)
            .map_err(|e| ServiceError::InvalidGraph(e.to_string()))?;
        graph.workflow_id = workflow.id.clone();

        let next_number = VersionRepository::latest_number(&self.pool, id).await? + 1;
        graph.version = next_number as u64;

        let plan =
            compile(&graph, &self.registry, &self.contracts).map_err(ServiceError::Compile)?;

        if let Some(existing) = VersionRepository::find_by_hash(&self.pool, id, &plan.hash).await? {
            WorkflowRepository::set_current_version(&self.pool, id, &existing.id).await?;
            return Ok(existing);
        }

        let plan_json = serde_json::to_string(&plan).map_err(DatabaseError::from)?;
        let version =
            VersionRepository::create(&self.pool, id, next_number, &plan_json, &plan.hash).await?;
        WorkflowRepository::set_current_version(&self.pool, id, &version.id).await?;
        Ok(version)
    }

    /// Resolve the version a run should bind to: an explicit version id,
    /// an explicit version number, or the current pointer.
    async fn resolve_version(
        &self,
        workflow_id: &str,
        version_id: Option<&str>,
        version_number: Option<i64>,
    ) -> Result<WorkflowVersionRow, ServiceError> {
        if let Some(version_id) = version_id {
            return VersionRepository::get(&self.pool, version_id)
                .await?
                .filter(|v| v.workflow_id == workflow_id)
                .ok_or_else(|| ServiceError::NotFound(format!("version '{}'", version_id)));
        }
        if let Some(number) = version_number {
            return VersionRepository::find_by_number(&self.pool, workflow_id, number)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("version {} of '{}'", number, workflow_id))
                });
        }
        let workflow = WorkflowRepository::get(&self.pool, workflow_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("workflow '{}'", workflow_id)))?;
        let current = workflow
            .current_version_id
            .ok_or_else(|| ServiceError::NoCommittedVersion(workflow_id.to_string()))?;
        VersionRepository::get(&self.pool, &current)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("version '{}'", current)))
    }

    /// Start a run of a workflow version.
    pub async fn start_run(
        &self,
        workflow_id: &str,
        inputs: JsonMap<String, Value>,
        version_id: Option<&str>,
        version_number: Option<i64>,
        trigger: TriggerInfo,
    ) -> Result<String, ServiceError> {
        let version = self
            .resolve_version(workflow_id, version_id, version_number)
            .await?;
        let plan: ExecutionPlan = serde_json::from_str(&version.plan)
            .map_err(|e| ServiceError::InvalidGraph(e.to_string()))?;

        let trigger_kind = serde_json::to_value(trigger.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "manual".to_string());
        let trigger_source = trigger.source.clone();
        let inputs_json = serde_json::to_string(&inputs).map_err(DatabaseError::from)?;

        let run_id = self
            .engine
            .start_run(Arc::new(plan), inputs, trigger, RunOptions::default())
            .await?;

        RunRepository::create(
            &self.pool,
            &run_id,
            workflow_id,
            &version.id,
            &version.hash,
            &trigger_kind,
            trigger_source.as_deref(),
            &inputs_json,
        )
        .await?;
        self.spawn_status_mirror(run_id.clone());
        Ok(run_id)
    }

    /// Mirror the run's terminal status back onto its row.
    fn spawn_status_mirror(&self, run_id: String) {
        let state = self.clone();
        tokio::spawn(async move {
            let _ = RunRepository::update_status(&state.pool, &run_id, "RUNNING", None, false).await;
            if let Ok(status) = state.engine.wait_until_terminal(&run_id).await {
                let record = state.engine.run_state(&run_id);
                let error = record.as_ref().and_then(|r| r.error.clone());
                let label = serde_json::to_value(status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "FAILED".to_string());
                let _ = RunRepository::update_status(
                    &state.pool,
                    &run_id,
                    &label,
                    error.as_deref(),
                    true,
                )
                .await;
            }
        });
    }

    /// Current run record from the engine.
    pub fn run_status(&self, run_id: &str) -> Option<RunRecord> {
        self.engine.run_state(run_id)
    }

    /// Captured inputs and bound version for rerun.
    pub async fn run_config(&self, run_id: &str) -> Result<RunRow, ServiceError> {
        RunRepository::get(&self.pool, run_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("run '{}'", run_id)))
    }

    /// Resolve a human-input suspension through the engine's typed
    /// channel, translating the REST body shape onto the suspension
    /// kind's payload contract.
    pub async fn resolve_human_input(
        &self,
        suspension_id: &str,
        response_data: Value,
        comment: Option<String>,
    ) -> Result<(), ServiceError> {
        let run_id = self
            .engine
            .run_for_suspension(suspension_id)
            .ok_or_else(|| ServiceError::NotFound(format!("suspension '{}'", suspension_id)))?;
        let record = self
            .engine
            .run_state(&run_id)
            .and_then(|run| run.suspensions.get(suspension_id).cloned())
            .ok_or_else(|| ServiceError::NotFound(format!("suspension '{}'", suspension_id)))?;

        let payload = match record.kind {
            SuspensionKind::Approval => {
                let approved = response_data
                    .get("approved")
                    .and_then(Value::as_bool)
                    .or_else(|| {
                        response_data
                            .get("status")
                            .and_then(Value::as_str)
                            .map(|s| s == "approved")
                    })
                    .unwrap_or(false);
                let mut payload = json!({"approved": approved});
                if let Some(comment) = comment {
                    payload["responseNote"] = json!(comment);
                }
                payload
            }
            _ => response_data,
        };

        self.engine
            .resolve_suspension(suspension_id, &record.token, payload)
            .await?;
        Ok(())
    }

    /// Register a webhook configuration.
    pub async fn register_webhook(
        &self,
        path: &str,
        workflow_id: &str,
        rules: &[MappingRule],
    ) -> Result<String, ServiceError> {
        WorkflowRepository::get(&self.pool, workflow_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("workflow '{}'", workflow_id)))?;
        let rules_json = serde_json::to_string(rules).map_err(DatabaseError::from)?;
        let row = WebhookRepository::create(&self.pool, path, workflow_id, &rules_json).await?;
        Ok(row.id)
    }

    /// Handle one inbound webhook delivery: evaluate the mapping rules,
    /// validate the mapped inputs against the workflow's runtime-input
    /// schema, and start a run.
    pub async fn trigger_webhook(
        &self,
        path: &str,
        payload: &Value,
        headers: &HashMap<String, String>,
    ) -> Result<String, ServiceError> {
        let webhook = WebhookRepository::find_by_path(&self.pool, path)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("webhook '{}'", path)))?;
        let rules: Vec<MappingRule> = serde_json::from_str(&webhook.rules)
            .map_err(|e| ServiceError::InvalidGraph(e.to_string()))?;

        let mapped = evaluate_rules(&rules, payload, headers)?;

        let version = self
            .resolve_version(&webhook.workflow_id, None, None)
            .await?;
        let plan: ExecutionPlan = serde_json::from_str(&version.plan)
            .map_err(|e| ServiceError::InvalidGraph(e.to_string()))?;
        let schema = runtime_input_schema(&plan);
        validate_inputs(&schema, &mapped)?;

        self.start_run(
            &webhook.workflow_id,
            mapped,
            None,
            None,
            TriggerInfo::webhook(path),
        )
        .await
    }

    /// Reattach runs whose mirrored status is non-terminal (startup
    /// recovery). Returns how many runs were resumed.
    pub async fn recover_unfinished(&self) -> Result<usize, ServiceError> {
        let rows = RunRepository::list_unfinished(&self.pool).await?;
        let mut recovered = 0;
        for row in rows {
            let Some(version) = VersionRepository::get(&self.pool, &row.version_id).await? else {
                tracing::warn!(run_id = %row.id, "cannot recover run, version missing");
                continue;
            };
            let plan: ExecutionPlan = match serde_json::from_str(&version.plan) {
                Ok(plan) => plan,
                Err(error) => {
                    tracing::warn!(run_id = %row.id, %error, "cannot recover run, bad plan");
                    continue;
                }
            };
            match self.engine.recover_run(&row.id, Arc::new(plan)).await {
                Ok(status) if !status.is_terminal() => {
                    self.spawn_status_mirror(row.id.clone());
                    recovered += 1;
                }
                Ok(status) => {
                    let label = serde_json::to_value(status)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| "FAILED".to_string());
                    let _ = RunRepository::update_status(&self.pool, &row.id, &label, None, true)
                        .await;
                }
                Err(error) => {
                    tracing::warn!(run_id = %row.id, %error, "run recovery failed");
                }
            }
        }
        Ok(recovered)
    }
}
