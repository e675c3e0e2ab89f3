//! Webhook configuration row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered webhook ingress configuration.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WebhookRow {
    pub id: String,
    /// Public ingress path under `/webhooks/inbound/{path}`.
    pub path: String,
    pub workflow_id: String,
    /// Serialized mapping rules (see [`crate::webhook::MappingRule`]).
    pub rules: String,
    pub created_at: String,
}
