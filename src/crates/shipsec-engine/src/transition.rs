//! Typed engine transitions and journal replay.
//!
//! Every state change the scheduler makes is expressed as a
//! [`Transition`], journaled write-ahead, and then applied to the
//! in-memory [`RunRecord`] through [`apply`]. Restart replays the same
//! transitions through the same `apply`, so the durable and in-memory
//! state machines cannot drift. `apply` is idempotent: re-applying a
//! transition that already took effect is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use shipsec_checkpoint::TransitionRecord;
use shipsec_core::error::NodeError;

use crate::error::EngineError;
use crate::run::{
    ChildSlot, FanoutRecord, NodeOutput, NodeStatus, RunRecord, RunStatus, SuspensionRecord,
    SuspensionStatus,
};

/// One durable state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Seeds the run record; always sequence zero.
    RunCreated { record: RunRecord },
    /// Run-level status change.
    RunStatusChanged {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A node was scheduled (initially or for a retry).
    NodeWaiting { node: String, attempt: u32 },
    /// A node attempt started.
    NodeRunning { node: String, attempt: u32 },
    /// A node parked on a suspension.
    NodeAwaitingInput { node: String },
    /// A node reached a terminal state.
    NodeTerminal {
        node: String,
        status: NodeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<NodeOutput>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<NodeError>,
    },
    /// A node fanned out into a child family.
    FanoutStarted { node: String, record: FanoutRecord },
    /// One fan-out child reached a terminal slot state.
    ChildTerminal {
        node: String,
        index: usize,
        slot: ChildSlot,
    },
    /// An `any`/`first` join chose its winning child.
    FanoutWinner { node: String, index: usize },
    /// A suspension record was created.
    SuspensionCreated { record: SuspensionRecord },
    /// A suspension was resolved with this payload.
    SuspensionResolved { id: String, payload: Value },
    /// A suspension expired or was revoked.
    SuspensionStatusChanged {
        id: String,
        status: SuspensionStatus,
    },
}

/// Apply a transition to the run record. Replaying an already-applied
/// transition leaves the record unchanged.
pub fn apply(record: &mut RunRecord, transition: &Transition) {
    match transition {
        Transition::RunCreated { record: seed } => {
            if record.id.is_empty() || record.id == seed.id {
                *record = seed.clone();
            }
        }
        Transition::RunStatusChanged { status, error } => {
            if record.status.is_terminal() {
                return;
            }
            record.status = *status;
            if record.started_at.is_none() && *status == RunStatus::Running {
                record.started_at = Some(chrono::Utc::now());
            }
            if status.is_terminal() {
                record.finished_at = Some(chrono::Utc::now());
            }
            if let Some(error) = error {
                record.error.get_or_insert_with(|| error.clone());
            }
        }
        Transition::NodeWaiting { node, attempt } => {
            if let Some(state) = record.nodes.get_mut(node) {
                if state.status.allows(NodeStatus::Waiting) || state.status == NodeStatus::Running {
                    state.status = NodeStatus::Waiting;
                    state.attempt = (*attempt).max(state.attempt);
                    state.scheduled_at = Some(chrono::Utc::now());
                }
            }
        }
        Transition::NodeRunning { node, attempt } => {
            if let Some(state) = record.nodes.get_mut(node) {
                if !state.status.is_terminal() {
                    state.status = NodeStatus::Running;
                    state.attempt = (*attempt).max(state.attempt);
                    if state.started_at.is_none() {
                        state.started_at = Some(chrono::Utc::now());
                    }
                }
            }
        }
        Transition::NodeAwaitingInput { node } => {
            if let Some(state) = record.nodes.get_mut(node) {
                if !state.status.is_terminal() {
                    state.status = NodeStatus::AwaitingInput;
                }
            }
        }
        Transition::NodeTerminal {
            node,
            status,
            output,
            error,
        } => {
            if let Some(state) = record.nodes.get_mut(node) {
                if state.status.is_terminal() {
                    return;
                }
                state.status = *status;
                state.finished_at = Some(chrono::Utc::now());
                if let Some(output) = output {
                    state.output = Some(output.clone());
                }
                if let Some(error) = error {
                    state.last_error = Some(error.clone());
                }
            }
        }
        Transition::FanoutStarted { node, record: fanout } => {
            if let Some(state) = record.nodes.get_mut(node) {
                if state.children.is_none() {
                    state.children = Some(fanout.clone());
                }
            }
        }
        Transition::ChildTerminal { node, index, slot } => {
            if let Some(children) = record
                .nodes
                .get_mut(node)
                .and_then(|state| state.children.as_mut())
            {
                if let Some(existing) = children.slots.get_mut(*index) {
                    if !existing.is_terminal() {
                        *existing = slot.clone();
                    }
                }
            }
        }
        Transition::FanoutWinner { node, index } => {
            if let Some(children) = record
                .nodes
                .get_mut(node)
                .and_then(|state| state.children.as_mut())
            {
                children.winner.get_or_insert(*index);
            }
        }
        Transition::SuspensionCreated { record: suspension } => {
            record
                .suspensions
                .entry(suspension.id.clone())
                .or_insert_with(|| suspension.clone());
        }
        Transition::SuspensionResolved { id, .. } => {
            if let Some(suspension) = record.suspensions.get_mut(id) {
                if suspension.status == SuspensionStatus::Pending {
                    suspension.status = SuspensionStatus::Resolved;
                }
            }
        }
        Transition::SuspensionStatusChanged { id, status } => {
            if let Some(suspension) = record.suspensions.get_mut(id) {
                if suspension.status == SuspensionStatus::Pending {
                    suspension.status = *status;
                }
            }
        }
    }
}

/// Fold a journal back into a run record. The first record must be
/// `RunCreated`; the returned sequence number is where appends resume.
pub fn replay(run_id: &str, records: &[TransitionRecord]) -> Result<(RunRecord, u64), EngineError> {
    let first = records.first().ok_or_else(|| EngineError::Replay {
        run_id: run_id.to_string(),
        message: "journal is empty".to_string(),
    })?;
    let seed: Transition =
        serde_json::from_value(first.body.clone()).map_err(|e| EngineError::Replay {
            run_id: run_id.to_string(),
            message: format!("undecodable transition at seq {}: {}", first.seq, e),
        })?;
    let Transition::RunCreated { record } = seed else {
        return Err(EngineError::Replay {
            run_id: run_id.to_string(),
            message: "journal does not start with run_created".to_string(),
        });
    };

    let mut state = record;
    let mut next_seq = first.seq + 1;
    for record in &records[1..] {
        let transition: Transition =
            serde_json::from_value(record.body.clone()).map_err(|e| EngineError::Replay {
                run_id: run_id.to_string(),
                message: format!("undecodable transition at seq {}: {}", record.seq, e),
            })?;
        apply(&mut state, &transition);
        next_seq = record.seq + 1;
    }
    Ok((state, next_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::TriggerInfo;
    use serde_json::json;

    fn seed() -> RunRecord {
        RunRecord::new(
            "run-1",
            "wf-1",
            "hash",
            "tenant-1",
            TriggerInfo::manual(),
            serde_json::Map::new(),
            vec!["a".to_string()],
        )
    }

    #[test]
    fn test_apply_terminal_is_idempotent() {
        let mut record = seed();
        let terminal = Transition::NodeTerminal {
            node: "a".to_string(),
            status: NodeStatus::Success,
            output: Some(NodeOutput::Outputs {
                outputs: serde_json::Map::new(),
            }),
            error: None,
        };
        apply(&mut record, &terminal);
        assert_eq!(record.nodes["a"].status, NodeStatus::Success);

        // Replaying a later error must not overwrite the terminal state.
        let late_error = Transition::NodeTerminal {
            node: "a".to_string(),
            status: NodeStatus::Error,
            output: None,
            error: Some(NodeError::internal("late")),
        };
        apply(&mut record, &late_error);
        assert_eq!(record.nodes["a"].status, NodeStatus::Success);
        assert!(record.nodes["a"].last_error.is_none());
    }

    #[test]
    fn test_run_terminal_status_sticks() {
        let mut record = seed();
        apply(
            &mut record,
            &Transition::RunStatusChanged {
                status: RunStatus::Cancelled,
                error: None,
            },
        );
        apply(
            &mut record,
            &Transition::RunStatusChanged {
                status: RunStatus::Running,
                error: None,
            },
        );
        assert_eq!(record.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_replay_roundtrip() {
        let transitions = vec![
            Transition::RunCreated { record: seed() },
            Transition::RunStatusChanged {
                status: RunStatus::Running,
                error: None,
            },
            Transition::NodeRunning {
                node: "a".to_string(),
                attempt: 1,
            },
            Transition::NodeTerminal {
                node: "a".to_string(),
                status: NodeStatus::Success,
                output: Some(NodeOutput::Outputs {
                    outputs: serde_json::Map::new(),
                }),
                error: None,
            },
        ];
        let records: Vec<TransitionRecord> = transitions
            .iter()
            .enumerate()
            .map(|(i, t)| {
                TransitionRecord::new("run-1", i as u64, serde_json::to_value(t).unwrap())
            })
            .collect();

        let (state, next_seq) = replay("run-1", &records).unwrap();
        assert_eq!(next_seq, 4);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.nodes["a"].status, NodeStatus::Success);
        assert_eq!(state.nodes["a"].attempt, 1);
    }

    #[test]
    fn test_replay_requires_run_created() {
        let records = vec![TransitionRecord::new(
            "run-1",
            0,
            json!({"type": "node_running", "node": "a", "attempt": 1}),
        )];
        assert!(matches!(
            replay("run-1", &records),
            Err(EngineError::Replay { .. })
        ));
    }
}
