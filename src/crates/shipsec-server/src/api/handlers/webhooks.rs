//! Webhook configuration and public ingress handlers.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::service::AppState;
use crate::webhook::MappingRule;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureBody {
    pub path: String,
    pub workflow_id: String,
    pub rules: Vec<MappingRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureResponse {
    pub id: String,
    pub inbound_url: String,
}

/// `POST /webhooks/configurations` - register a parsing-rule webhook.
pub async fn configure(
    State(state): State<AppState>,
    Json(body): Json<ConfigureBody>,
) -> ApiResult<(StatusCode, Json<ConfigureResponse>)> {
    let id = state
        .register_webhook(&body.path, &body.workflow_id, &body.rules)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ConfigureResponse {
            id,
            inbound_url: format!("{}/webhooks/inbound/{}", state.config.base_url, body.path),
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundResponse {
    pub run_id: String,
}

/// `POST /webhooks/inbound/{path}` - public ingress. Evaluates the
/// mapping rules, validates the inputs, and starts a run.
pub async fn inbound(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> ApiResult<Json<InboundResponse>> {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let run_id = state.trigger_webhook(&path, &payload, &headers).await?;
    Ok(Json(InboundResponse { run_id }))
}
