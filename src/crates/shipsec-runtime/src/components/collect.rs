//! Collect step: the join point downstream of a fan-out.
//!
//! The engine aggregates a fan-out family's outputs according to the
//! consuming node's join strategy and delivers the aggregate here; the
//! component itself is an identity pass-through.

use async_trait::async_trait;
use serde_json::Value;

use shipsec_core::component::{ComponentDefinition, PortSpec, RetryPolicy};
use shipsec_core::error::NodeError;
use shipsec_core::port::PortType;

use crate::inline::{ComponentCall, InlineComponent};
use crate::invoke::Outcome;

pub const COMPONENT_ID: &str = "core.collect";

pub fn definition() -> ComponentDefinition {
    ComponentDefinition::new(COMPONENT_ID, "core")
        .with_label("Collect")
        .with_input(PortSpec::new("values", PortType::list(PortType::Any)))
        .with_output(PortSpec::new("values", PortType::list(PortType::Any)))
        .with_retry(RetryPolicy::none())
}

pub struct Collect;

#[async_trait]
impl InlineComponent for Collect {
    async fn run(&self, call: ComponentCall) -> Result<Outcome, NodeError> {
        let values = call
            .request
            .input("values")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        if !values.is_array() {
            return Err(NodeError::validation("input 'values' must be a list"));
        }
        Ok(Outcome::single("values", values))
    }
}
