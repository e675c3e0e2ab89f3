//! Router wiring for the core REST surface.

use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{executions, human_inputs, webhooks, workflows};
use crate::service::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflows", post(workflows::create))
        .route("/workflows/:id", put(workflows::update))
        .route("/workflows/:id/commit", post(workflows::commit))
        .route("/workflows/:id/run", post(workflows::run))
        .route("/workflows/runs/:run_id/status", get(workflows::status))
        .route("/workflows/runs/:run_id/cancel", post(workflows::cancel))
        .route("/executions/:run_id/logs", get(executions::logs))
        .route("/executions/:run_id/config", get(executions::config))
        .route("/humanInputs/:id/resolve", post(human_inputs::resolve))
        .route("/webhooks/configurations", post(webhooks::configure))
        .route("/webhooks/inbound/:path", post(webhooks::inbound))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
