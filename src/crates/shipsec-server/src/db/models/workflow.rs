//! Workflow and version rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One workflow with its authoring draft.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Serialized authored [`shipsec_core::graph::Graph`].
    pub draft_graph: String,
    /// Current committed version pointer, if any.
    pub current_version_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One committed, frozen plan version.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WorkflowVersionRow {
    pub id: String,
    pub workflow_id: String,
    /// Monotone version counter within the workflow.
    pub version: i64,
    /// Serialized [`shipsec_core::plan::ExecutionPlan`].
    pub plan: String,
    /// Plan content hash; unique per workflow for idempotent commits.
    pub hash: String,
    pub created_at: String,
}
