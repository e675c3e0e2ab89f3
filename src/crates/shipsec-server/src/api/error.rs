//! API error types and HTTP response conversion.
//!
//! Validation problems map to 4xx, internal failures to 5xx; compile
//! reports are returned with their structured issues so the editor can
//! annotate nodes and edges.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use shipsec_engine::{EngineError, ResolveError};

use crate::service::ServiceError;
use crate::webhook::WebhookError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error surfaced by a handler.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation { issues: Vec<serde_json::Value> },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<serde_json::Value>,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Validation { .. } => "ValidationError",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let issues = match &self {
            ApiError::Validation { issues } => issues.clone(),
            _ => Vec::new(),
        };
        let body = ApiErrorBody {
            error: self.error_type().to_string(),
            message: self.to_string(),
            issues,
        };
        if status.is_server_error() {
            tracing::error!("API error: {:?}", body.message);
        }
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => ApiError::NotFound(what),
            ServiceError::NoCommittedVersion(id) => {
                ApiError::Conflict(format!("workflow '{}' has no committed version", id))
            }
            ServiceError::Compile(report) => ApiError::Validation {
                issues: report
                    .issues
                    .iter()
                    .map(|issue| serde_json::to_value(issue).unwrap_or_default())
                    .collect(),
            },
            ServiceError::InvalidGraph(message) => ApiError::BadRequest(message),
            ServiceError::Webhook(err) => match err {
                WebhookError::SchemaViolation(detail) => ApiError::BadRequest(detail),
                WebhookError::MissingValue { .. } => ApiError::BadRequest(err.to_string()),
                WebhookError::NoRuntimeInputs => ApiError::BadRequest(err.to_string()),
            },
            ServiceError::Engine(err) => err.into(),
            ServiceError::Db(err) => {
                if err.is_not_found() {
                    ApiError::NotFound("resource".to_string())
                } else if err.is_constraint_violation() {
                    ApiError::Conflict(err.to_string())
                } else {
                    ApiError::Internal(err.to_string())
                }
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownRun(id) => ApiError::NotFound(format!("run '{}'", id)),
            EngineError::Resolve(resolve) => match resolve {
                ResolveError::NotFound(id) => ApiError::NotFound(format!("suspension '{}'", id)),
                ResolveError::AlreadyResolved(_) | ResolveError::Revoked(_) => {
                    ApiError::Conflict(resolve.to_string())
                }
                ResolveError::InvalidToken | ResolveError::InvalidPayload(_) => {
                    ApiError::BadRequest(resolve.to_string())
                }
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Validation { issues: vec![] }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_resolve_errors_map_to_conflict_or_bad_request() {
        let already: ApiError =
            EngineError::Resolve(ResolveError::AlreadyResolved("s".into())).into();
        assert_eq!(already.status_code(), StatusCode::CONFLICT);

        let token: ApiError = EngineError::Resolve(ResolveError::InvalidToken).into();
        assert_eq!(token.status_code(), StatusCode::BAD_REQUEST);
    }
}
