//! Timer step: park the node until a wall-clock instant.
//!
//! The suspension's timeout is the success path for the `timer` kind:
//! when it fires, the engine resolves the node with `{elapsed: true}`
//! instead of marking it timed out.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shipsec_core::component::{ComponentDefinition, ParamSpec, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::{Outcome, SuspensionKind, SuspensionRequest};

pub const COMPONENT_ID: &str = "time.wait";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "time")
        .with_label("Wait")
        .with_input(PortSpec::new("value", PortType::Any).optional())
        .with_output(PortSpec::new("elapsed", PortType::Boolean))
        .with_parameter(
            ParamSpec::new("duration_seconds")
                .required()
                .with_schema(json!({"type": "number", "minimum": 0})),
        )
        .with_retry(RetryPolicy::none())
}

pub struct Wait;

#[async_trait]
impl InlineComponent for Wait {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let seconds = call
            .request
            .param("duration_seconds")
            .and_then(Value::as_f64)
            .ok_or_else(|| NodeError::validation("parameter 'duration_seconds' is required"))?;

        let request = SuspensionRequest::new(
            Uuid::new_v4().to_string(),
            SuspensionKind::Timer,
            format!("wait {}s", seconds),
        )
        .with_timeout_at(Utc::now() + Duration::milliseconds((seconds * 1000.0) as i64));

        Ok(Outcome::Pending(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_requires_duration() {
        let def = definition();
        assert!(def.parameter("duration_seconds").unwrap().required);
        assert_eq!(def.outputs[0].id, "elapsed");
    }
}
