//! # shipsec-engine - Durable Workflow Execution
//!
//! Advances a run through a compiled plan: dependency-ready scheduling,
//! concurrent dispatch through the component runtime, fan-out/join
//! families, retry policies, cooperative cancellation, suspension on
//! human input and timers, and journal-backed durability.
//!
//! ## Execution model
//!
//! One scheduler task owns each run (no shared mutable state across
//! workers); worker tasks publish results back over a channel. A node
//! becomes ready when every incoming edge has a delivered value or is
//! masked by a skipped branch. Suspensions park the run durably; the
//! typed resumption channel ([`Engine::resolve_suspension`]) validates
//! the single-use token and payload before the state machine advances.
//!
//! ## Durability
//!
//! Every transition is journaled write-ahead through
//! [`shipsec_checkpoint::RunJournal`]; [`Engine::recover_run`] replays
//! the journal after a restart, re-dispatches lost attempts within the
//! retry budget, and leaves parked suspensions parked.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shipsec_checkpoint::MemoryJournal;
//! use shipsec_engine::{Engine, RunOptions, TriggerInfo};
//! use shipsec_runtime::{ComponentRuntime, InlineRegistry};
//!
//! # async fn demo(plan: Arc<shipsec_core::plan::ExecutionPlan>) {
//! let runtime = Arc::new(ComponentRuntime::new(InlineRegistry::new()));
//! let engine = Engine::new(runtime, Arc::new(MemoryJournal::new()));
//! let run_id = engine
//!     .start_run(plan, serde_json::Map::new(), TriggerInfo::manual(), RunOptions::default())
//!     .await
//!     .unwrap();
//! let status = engine.wait_until_terminal(&run_id).await.unwrap();
//! println!("run {} finished: {:?}", run_id, status);
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod run;
pub mod scheduler;
pub mod suspend;
pub mod transition;

pub use engine::{Engine, EngineConfig, RunOptions};
pub use error::{EngineError, ResolveError};
pub use run::{
    ChildSlot, FanoutRecord, NodeOutput, NodeStateRecord, NodeStatus, RunRecord, RunStatus,
    SuspensionRecord, SuspensionStatus, TriggerInfo, TriggerKind,
};
pub use transition::Transition;
