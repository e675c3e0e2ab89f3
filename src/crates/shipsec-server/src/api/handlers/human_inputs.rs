//! Human-input resolution handler.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::service::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    /// Resolution status; currently only `resolved` is meaningful.
    #[allow(dead_code)]
    pub status: Option<String>,
    /// Kind-specific payload: `{status: approved|rejected}` for
    /// approvals, the form data for forms.
    #[serde(default)]
    pub response_data: Value,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `POST /humanInputs/{id}/resolve`.
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<StatusCode> {
    state
        .resolve_human_input(&id, body.response_data, body.comment)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
