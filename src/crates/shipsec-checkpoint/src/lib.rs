//! # shipsec-checkpoint - Durable Run Journal
//!
//! Storage abstraction for the execution engine's durability layer. The
//! engine appends one [`TransitionRecord`] after every state transition
//! (node ready, node running, node terminal, suspension created,
//! suspension resolved); restart loads the records back and replays them
//! to reconstruct in-memory run state.
//!
//! The journal is deliberately ignorant of the engine's vocabulary: a
//! record carries an opaque JSON body plus the `(run_id, seq)` pair that
//! makes appends idempotent. Implementing [`RunJournal`] against any
//! store (SQLite, Postgres, an object store) is enough to make the
//! engine durable on that store.
//!
//! ```rust
//! use shipsec_checkpoint::{MemoryJournal, RunJournal, TransitionRecord};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let journal = MemoryJournal::new();
//! journal
//!     .append(TransitionRecord::new("run-1", 0, json!({"type": "run_created"})))
//!     .await
//!     .unwrap();
//! // Replaying a completed transition is a no-op.
//! journal
//!     .append(TransitionRecord::new("run-1", 0, json!({"type": "run_created"})))
//!     .await
//!     .unwrap();
//! assert_eq!(journal.load("run-1").await.unwrap().len(), 1);
//! # }
//! ```

mod error;
mod memory;
mod record;
mod traits;

pub use error::JournalError;
pub use memory::MemoryJournal;
pub use record::TransitionRecord;
pub use traits::RunJournal;
