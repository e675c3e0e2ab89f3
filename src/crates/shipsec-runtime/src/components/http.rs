//! Plain HTTP request step.
//!
//! The workhorse for glue against security tooling APIs. Failures map
//! onto the same taxonomy the remote runner uses, so retry policies
//! behave identically whether a request runs inline or remotely.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map as JsonMap, Value};

use shipsec_core::component::{ComponentDefinition, ParamSpec, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::capability::LogLevel;
use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::Outcome;
use crate::remote::map_status;

pub const COMPONENT_ID: &str = "http.request";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "http")
        .with_label("HTTP request")
        .with_input(PortSpec::new("url", PortType::Text).optional())
        .with_input(PortSpec::new("body", PortType::Json).optional())
        .with_output(PortSpec::new("status", PortType::Number))
        .with_output(PortSpec::new("body", PortType::Text))
        .with_output(PortSpec::new("json", PortType::Json))
        .with_parameter(ParamSpec::new("url").with_schema(json!({"type": "string"})))
        .with_parameter(
            ParamSpec::new("method")
                .with_schema(json!({
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"]
                }))
                .with_default(json!("GET")),
        )
        .with_parameter(ParamSpec::new("headers").with_schema(json!({"type": "object"})))
        .with_parameter(
            ParamSpec::new("timeout_seconds")
                .with_schema(json!({"type": "number", "minimum": 1}))
                .with_default(json!(30)),
        )
        .with_retry(
            RetryPolicy::new(3)
                .with_initial_interval(1.0)
                .with_maximum_interval(30.0),
        )
}

pub struct HttpRequest {
    client: reqwest::Client,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InlineComponent for HttpRequest {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        // An edge-supplied URL wins over the parameter.
        let url = call
            .request
            .text_input("url")
            .or_else(|| call.request.param("url").and_then(Value::as_str))
            .ok_or_else(|| NodeError::validation("no URL supplied via input or parameter"))?
            .to_string();
        let method = call
            .request
            .param("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let timeout = call
            .request
            .param("timeout_seconds")
            .and_then(Value::as_f64)
            .unwrap_or(30.0);

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeError::validation(format!("invalid HTTP method '{}'", method)))?;
        let mut builder = self
            .client
            .request(method, &url)
            .timeout(Duration::from_secs_f64(timeout));
        if let Some(headers) = call.request.param("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(name, value);
                }
            }
        }
        if let Some(body) = call.request.input("body") {
            builder = builder.json(body);
        }

        call.caps.log(LogLevel::Debug, format!("requesting {}", url));
        let response = tokio::select! {
            response = builder.send() => response.map_err(|e| {
                NodeError::transient(format!("request to {} failed: {}", url, e))
            })?,
            _ = call.request.cancel.cancelled() => {
                return Err(call.request.cancel.cancellation_error());
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

        let body = response.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        let mut outputs = JsonMap::new();
        outputs.insert("status".to_string(), json!(status.as_u16()));
        outputs.insert("body".to_string(), json!(body));
        outputs.insert("json".to_string(), parsed);
        Ok(Outcome::Success { outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_retries_transient_failures() {
        let def = definition();
        assert_eq!(def.retry.max_attempts, 3);
        assert!(def
            .retry
            .allows_retry(shipsec_core::error::ErrorKind::Transient, 1));
    }
}
