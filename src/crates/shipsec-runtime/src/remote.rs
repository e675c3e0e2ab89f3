//! Remote runner: invocations posted to a declared HTTP endpoint.
//!
//! The request body carries the component id, correlation ids, inputs,
//! and params. A 2xx response body becomes the node's outputs: either the
//! object under an `outputs` key, or the whole body as the single
//! `result` output. Non-2xx statuses are projected into the error
//! taxonomy so the engine's retry policy applies uniformly.

use std::time::Duration;

use serde_json::{json, Map as JsonMap, Value};

use shipsec_core::component::RemoteSpec;
use shipsec_core::error::{ErrorKind, NodeError};

use crate::capability::{Capabilities, LogLevel};
use crate::invoke::{InvocationRequest, Outcome};

/// Runner posting invocations over HTTP.
#[derive(Clone)]
pub struct RemoteRunner {
    client: reqwest::Client,
}

impl RemoteRunner {
    /// A runner with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Invoke the remote endpoint declared by `spec`.
    pub async fn invoke(
        &self,
        spec: &RemoteSpec,
        request: &InvocationRequest,
        caps: &Capabilities,
    ) -> Result<Outcome, NodeError> {
        let body = json!({
            "component": request.component,
            "runId": request.run_id,
            "nodeId": request.node_id,
            "tenantId": request.tenant_id,
            "inputs": request.inputs,
            "params": request.params,
        });

        caps.log(
            LogLevel::Debug,
            format!("posting invocation to {}", spec.endpoint),
        );

        let send = self
            .client
            .post(&spec.endpoint)
            .timeout(Duration::from_secs(spec.timeout_seconds))
            .json(&body)
            .send();

        let response = tokio::select! {
            response = send => response.map_err(map_transport_error)?,
            _ = request.cancel.cancelled() => {
                return Err(request.cancel.cancellation_error());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let detail = response.text().await.unwrap_or_default();
            return Err(map_status(status.as_u16(), retry_after, &detail));
        }

        let payload: Value = response
            .json()
            .await
            .unwrap_or(Value::Null);
        Ok(Outcome::Success {
            outputs: outputs_from_payload(payload),
        })
    }
}

impl Default for RemoteRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Project a non-2xx HTTP status into the error taxonomy.
pub fn map_status(status: u16, retry_after: Option<u64>, detail: &str) -> NodeError {
    let message = if detail.is_empty() {
        format!("remote runner returned HTTP {}", status)
    } else {
        format!("remote runner returned HTTP {}: {}", status, detail)
    };
    match status {
        401 | 403 => NodeError::new(ErrorKind::Authentication, message),
        429 => {
            let err = NodeError::new(ErrorKind::RateLimited, message);
            match retry_after {
                Some(seconds) => err.with_retry_after(seconds),
                None => err,
            }
        }
        408 => NodeError::transient(message),
        400..=499 => NodeError::validation(message),
        _ => NodeError::transient(message),
    }
}

fn map_transport_error(err: reqwest::Error) -> NodeError {
    if err.is_timeout() {
        NodeError::transient(format!("remote invocation timed out: {}", err))
    } else {
        NodeError::transient(format!("remote invocation failed: {}", err))
    }
}

/// Interpret a successful response body as node outputs.
fn outputs_from_payload(payload: Value) -> JsonMap<String, Value> {
    if let Some(outputs) = payload.get("outputs").and_then(Value::as_object) {
        return outputs.clone();
    }
    let mut outputs = JsonMap::new();
    outputs.insert("result".to_string(), payload);
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(401, None, "").kind, ErrorKind::Authentication);
        assert_eq!(map_status(403, None, "").kind, ErrorKind::Authentication);
        assert_eq!(map_status(404, None, "").kind, ErrorKind::Validation);
        assert_eq!(map_status(408, None, "").kind, ErrorKind::Transient);
        assert_eq!(map_status(422, None, "").kind, ErrorKind::Validation);
        assert_eq!(map_status(500, None, "").kind, ErrorKind::Transient);
        assert_eq!(map_status(503, None, "").kind, ErrorKind::Transient);
    }

    #[test]
    fn test_rate_limit_carries_suggested_delay() {
        let err = map_status(429, Some(17), "slow down");
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.retry_after_seconds, Some(17));
        assert!(err.message.contains("slow down"));
    }

    #[test]
    fn test_outputs_from_payload() {
        let wrapped = serde_json::json!({"outputs": {"findings": ["a"], "count": 1}});
        let outputs = outputs_from_payload(wrapped);
        assert_eq!(outputs["count"], 1);

        let bare = serde_json::json!("just text");
        let outputs = outputs_from_payload(bare);
        assert_eq!(outputs["result"], "just text");
    }
}
