//! Execution log streaming and run configuration handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::db::repositories::LogRepository;
use crate::service::AppState;

/// `GET /executions/{runId}/logs` - stream structured log events as
/// NDJSON. Existing events flush immediately; the stream then follows
/// the run until it reaches a terminal state.
pub async fn logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Response> {
    if state.run_status(&run_id).is_none() {
        // Terminal runs from previous processes still stream their
        // persisted events.
        let row = crate::db::repositories::RunRepository::get(&state.pool, &run_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if row.is_none() {
            return Err(ApiError::NotFound(format!("run '{}'", run_id)));
        }
    }

    let stream = async_stream::stream! {
        let mut cursor = 0i64;
        loop {
            let rows = match LogRepository::list_after(&state.pool, &run_id, cursor).await {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::warn!(%error, "log stream query failed");
                    break;
                }
            };
            for row in rows {
                cursor = row.id;
                match serde_json::to_string(&row) {
                    Ok(line) => yield Ok::<_, std::io::Error>(format!("{}\n", line).into_bytes()),
                    Err(_) => continue,
                }
            }
            let live = state
                .run_status(&run_id)
                .map(|record| !record.status.is_terminal())
                .unwrap_or(false);
            if !live {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    };

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfigResponse {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_version_id: String,
    pub inputs: Value,
    pub trigger_kind: String,
}

/// `GET /executions/{runId}/config` - the captured inputs and bound
/// version, enabling rerun.
pub async fn config(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunConfigResponse>> {
    let row = state.run_config(&run_id).await?;
    let inputs: Value = serde_json::from_str(&row.inputs).unwrap_or(Value::Null);
    Ok(Json(RunConfigResponse {
        run_id: row.id,
        workflow_id: row.workflow_id,
        workflow_version_id: row.version_id,
        inputs,
        trigger_kind: row.trigger_kind,
    }))
}
