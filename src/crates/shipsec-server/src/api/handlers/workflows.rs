//! Workflow authoring and run handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use shipsec_core::graph::Graph;
use shipsec_engine::{RunRecord, TriggerInfo};

use crate::api::error::{ApiError, ApiResult};
use crate::service::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub graph: Option<Graph>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<String>,
}

/// `POST /workflows` - create an authoring draft.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkflowBody>,
) -> ApiResult<(StatusCode, Json<WorkflowResponse>)> {
    let row = state
        .create_workflow(&body.name, body.description.as_deref(), body.graph)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: row.id,
            name: row.name,
            description: row.description,
            current_version_id: row.current_version_id,
        }),
    ))
}

/// `PUT /workflows/{id}` - replace the draft graph.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(graph): Json<Graph>,
) -> ApiResult<StatusCode> {
    state.update_draft(&id, graph).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub version_id: String,
    pub version: i64,
    pub hash: String,
}

/// `POST /workflows/{id}/commit` - compile and freeze a plan version.
pub async fn commit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CommitResponse>> {
    let version = state.commit(&id).await?;
    Ok(Json(CommitResponse {
        version_id: version.id,
        version: version.version,
        hash: version.hash,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunBody {
    #[serde(default)]
    pub inputs: Option<JsonMap<String, Value>>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: String,
}

/// `POST /workflows/{id}/run` - start a run of the current (or named)
/// version.
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StartRunBody>>,
) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let run_id = state
        .start_run(
            &id,
            body.inputs.unwrap_or_default(),
            body.version_id.as_deref(),
            body.version,
            TriggerInfo::api(),
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(StartRunResponse { run_id })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateView {
    pub node_id: String,
    pub status: shipsec_engine::NodeStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionView {
    pub id: String,
    pub node_id: String,
    pub kind: shipsec_runtime::SuspensionKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusResponse {
    pub status: shipsec_engine::RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub node_states: Vec<NodeStateView>,
    pub outstanding_suspensions: Vec<SuspensionView>,
}

fn status_view(record: RunRecord) -> RunStatusResponse {
    let node_states = record
        .nodes
        .iter()
        .map(|(id, node)| NodeStateView {
            node_id: id.clone(),
            status: node.status,
            attempt: node.attempt,
            error: node.last_error.as_ref().map(|e| e.prefixed(id)),
            started_at: node.started_at.map(|t| t.to_rfc3339()),
            finished_at: node.finished_at.map(|t| t.to_rfc3339()),
        })
        .collect();
    let outstanding_suspensions = record
        .pending_suspensions()
        .into_iter()
        .map(|s| SuspensionView {
            id: s.id.clone(),
            node_id: s.node_id.clone(),
            kind: s.kind,
            title: s.title.clone(),
            description: s.description.clone(),
            context: s.context.clone(),
            timeout_at: s.timeout_at.map(|t| t.to_rfc3339()),
        })
        .collect();
    RunStatusResponse {
        status: record.status,
        error: record.error,
        node_states,
        outstanding_suspensions,
    }
}

/// `GET /workflows/runs/{runId}/status`.
pub async fn status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunStatusResponse>> {
    let record = state
        .run_status(&run_id)
        .ok_or_else(|| ApiError::NotFound(format!("run '{}'", run_id)))?;
    Ok(Json(status_view(record)))
}

/// `POST /workflows/runs/{runId}/cancel`.
pub async fn cancel(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.cancel_run(&run_id).await?;
    Ok(StatusCode::ACCEPTED)
}
