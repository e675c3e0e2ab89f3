//! Run and execution-log rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One run row; the authoritative per-node state lives in the journal,
/// this row carries the listing/rerun surface.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RunRow {
    pub id: String,
    pub workflow_id: String,
    pub version_id: String,
    pub plan_hash: String,
    pub status: String,
    pub trigger_kind: String,
    pub trigger_source: Option<String>,
    /// Captured runtime inputs (JSON), enabling rerun.
    pub inputs: String,
    pub error: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

/// One structured log event row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ExecutionLogRow {
    pub id: i64,
    pub run_id: String,
    pub node_id: String,
    pub level: String,
    pub message: String,
    pub at: String,
}
