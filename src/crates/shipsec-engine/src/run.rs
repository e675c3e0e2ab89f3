//! Run and node state records.
//!
//! A run is a single execution instance bound to one plan hash. The
//! engine owns each run's [`RunRecord`] through a single scheduler task;
//! everything here is plain serializable data so records replay from the
//! journal and surface through the status API unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use shipsec_core::error::NodeError;
use shipsec_core::graph::JoinStrategy;
use shipsec_runtime::SuspensionKind;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    AwaitingInput,
}

impl RunStatus {
    /// Whether the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Lifecycle of a node within a run.
///
/// Transitions are monotone within an attempt:
/// `Idle -> Waiting -> Running -> (Success | Error | AwaitingInput |
/// Skipped)`; a retry moves `Running -> Waiting` for the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Waiting,
    Running,
    Success,
    Error,
    AwaitingInput,
    Skipped,
}

impl NodeStatus {
    /// Whether the node can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Success | NodeStatus::Error | NodeStatus::Skipped
        )
    }

    /// Rank used to enforce monotone histories; terminal states share
    /// the top rank.
    fn rank(&self) -> u8 {
        match self {
            NodeStatus::Idle => 0,
            NodeStatus::Waiting => 1,
            NodeStatus::Running | NodeStatus::AwaitingInput => 2,
            NodeStatus::Success | NodeStatus::Error | NodeStatus::Skipped => 3,
        }
    }

    /// Whether moving to `next` within the same attempt is monotone.
    pub fn allows(&self, next: NodeStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Schedule,
    Api,
    Webhook,
}

/// Trigger metadata carried on the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub kind: TriggerKind,
    /// Schedule id, webhook path, or API principal, depending on kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TriggerInfo {
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            source: None,
        }
    }

    pub fn api() -> Self {
        Self {
            kind: TriggerKind::Api,
            source: None,
        }
    }

    pub fn schedule(id: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Schedule,
            source: Some(id.into()),
        }
    }

    pub fn webhook(path: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Webhook,
            source: Some(path.into()),
        }
    }
}

/// The recorded result of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeOutput {
    /// Ordinary outputs keyed by output port id.
    Outputs { outputs: JsonMap<String, Value> },
    /// A branching node chose this port; other branches are masked.
    Branch { port: String, value: Value },
}

/// Terminal state of one fan-out child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChildSlot {
    /// Not yet finished.
    Pending,
    /// Finished successfully with its outputs.
    Success { outputs: JsonMap<String, Value> },
    /// Exhausted its retry budget.
    Failed { error: NodeError },
    /// Cancelled before finishing (run cancel or losing sibling).
    Cancelled,
}

impl ChildSlot {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChildSlot::Pending)
    }
}

/// Fan-out bookkeeping on the producing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutRecord {
    /// Number of children (source list length).
    pub total: usize,
    /// Join strategy governing family completion.
    pub strategy: JoinStrategy,
    /// Child outcomes in source order.
    pub slots: Vec<ChildSlot>,
    /// Winning child for `Any`/`First` joins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<usize>,
}

impl FanoutRecord {
    pub fn new(total: usize, strategy: JoinStrategy) -> Self {
        Self {
            total,
            strategy,
            slots: vec![ChildSlot::Pending; total],
            winner: None,
        }
    }

    /// Whether every slot reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.slots.iter().all(ChildSlot::is_terminal)
    }
}

/// Per-node state record within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeStateRecord {
    pub status: NodeStatus,
    /// Attempts started so far (1-indexed once running).
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<NodeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutput>,
    /// Present only on nodes that fanned out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<FanoutRecord>,
}

/// Lifecycle of a suspension record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspensionStatus {
    Pending,
    Resolved,
    Expired,
    Cancelled,
}

/// A parked work item awaiting exactly one external resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    /// Child index when a fan-out child suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<usize>,
    pub kind: SuspensionKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema the resolution payload must satisfy (`form` kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Opaque context echoed to the responder.
    #[serde(default)]
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
    /// Single-use resolution token, compared in constant time.
    pub token: String,
    pub status: SuspensionStatus,
    pub created_at: DateTime<Utc>,
}

/// A single execution instance bound to one plan version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub workflow_id: String,
    /// Content hash of the plan this run is bound to for its lifetime.
    pub plan_hash: String,
    pub tenant_id: String,
    pub status: RunStatus,
    pub trigger: TriggerInfo,
    /// Runtime inputs seeded into the entry nodes.
    pub inputs: JsonMap<String, Value>,
    /// Per-node state, keyed by node id.
    pub nodes: BTreeMap<String, NodeStateRecord>,
    /// Suspension records, keyed by suspension id.
    pub suspensions: BTreeMap<String, SuspensionRecord>,
    /// First fatal failure, `[nodeId] message` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// A fresh pending run over the given node ids.
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        plan_hash: impl Into<String>,
        tenant_id: impl Into<String>,
        trigger: TriggerInfo,
        inputs: JsonMap<String, Value>,
        node_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            plan_hash: plan_hash.into(),
            tenant_id: tenant_id.into(),
            status: RunStatus::Pending,
            trigger,
            inputs,
            nodes: node_ids
                .into_iter()
                .map(|id| (id, NodeStateRecord::default()))
                .collect(),
            suspensions: BTreeMap::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Suspensions still awaiting resolution.
    pub fn pending_suspensions(&self) -> Vec<&SuspensionRecord> {
        self.suspensions
            .values()
            .filter(|s| s.status == SuspensionStatus::Pending)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_monotonicity() {
        assert!(NodeStatus::Idle.allows(NodeStatus::Waiting));
        assert!(NodeStatus::Waiting.allows(NodeStatus::Running));
        assert!(NodeStatus::Running.allows(NodeStatus::Success));
        assert!(NodeStatus::Running.allows(NodeStatus::AwaitingInput));
        assert!(NodeStatus::AwaitingInput.allows(NodeStatus::Success));
        // Terminal states accept nothing further.
        assert!(!NodeStatus::Success.allows(NodeStatus::Running));
        assert!(!NodeStatus::Skipped.allows(NodeStatus::Waiting));
        // No sliding backwards mid-attempt.
        assert!(!NodeStatus::Running.allows(NodeStatus::Idle));
    }

    #[test]
    fn test_run_status_terminality() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::AwaitingInput.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_run_status_serde_screaming_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::AwaitingInput).unwrap(),
            "\"AWAITING_INPUT\""
        );
    }

    #[test]
    fn test_fanout_record_terminality() {
        let mut record = FanoutRecord::new(2, JoinStrategy::All);
        assert!(!record.all_terminal());
        record.slots[0] = ChildSlot::Success {
            outputs: JsonMap::new(),
        };
        record.slots[1] = ChildSlot::Cancelled;
        assert!(record.all_terminal());
    }

    #[test]
    fn test_run_record_roundtrip() {
        let run = RunRecord::new(
            "run-1",
            "wf-1",
            "abc123",
            "tenant-1",
            TriggerInfo::manual(),
            JsonMap::new(),
            vec!["a".to_string(), "b".to_string()],
        );
        let text = serde_json::to_string(&run).unwrap();
        let back: RunRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, run);
        assert_eq!(back.nodes.len(), 2);
    }
}
