//! Row models for the relational store.

mod run;
mod schedule;
mod webhook;
mod workflow;

pub use run::{ExecutionLogRow, RunRow};
pub use schedule::ScheduleRow;
pub use webhook::WebhookRow;
pub use workflow::{WorkflowRow, WorkflowVersionRow};
