//! Schedule row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A cron-style schedule firing runs of a workflow.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: String,
    pub workflow_id: String,
    /// Cron expression evaluated by the scheduler tick.
    pub cron: String,
    /// Runtime inputs (JSON) seeded into each fired run.
    pub inputs: String,
    pub enabled: i64,
    pub created_at: String,
}
