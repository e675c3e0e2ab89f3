//! HTTP handlers, grouped by resource.

pub mod executions;
pub mod human_inputs;
pub mod webhooks;
pub mod workflows;
