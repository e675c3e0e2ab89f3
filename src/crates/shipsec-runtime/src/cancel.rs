//! Cancellation signalling for node invocations.
//!
//! A run hands every invocation a [`CancellationToken`]; runners forward
//! the signal to whatever executes the work (task abort, container kill,
//! remote cancel). Unlike a bare flag, the token records *why* the work
//! was cancelled ([`CancelReason`]), so a child that lost an `any`-join
//! race reports differently from one killed by a run deadline, and
//! [`cancellation_error`](CancellationToken::cancellation_error) projects
//! the reason into the shared error taxonomy for uniform handling by the
//! engine's retry and reporting paths.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use shipsec_core::error::{ErrorKind, NodeError};

/// Why an invocation was cancelled. The first recorded reason wins;
/// later signals are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The run was cancelled through the API.
    RunCancelled,
    /// The run's wall-clock deadline expired.
    DeadlineExceeded,
    /// Another node's failure is winding the run down.
    RunFailing,
    /// A sibling won an `any`/`first` join race.
    LostRace,
}

impl CancelReason {
    /// Human-readable description used in node error records.
    pub fn describe(&self) -> &'static str {
        match self {
            CancelReason::RunCancelled => "run cancelled",
            CancelReason::DeadlineExceeded => "run deadline exceeded",
            CancelReason::RunFailing => "run failed elsewhere",
            CancelReason::LostRace => "a sibling won the join race",
        }
    }
}

#[derive(Default)]
struct SignalState {
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
}

/// Cancellation signal shared between a run and one invocation (or one
/// fan-out child). Clones observe the same signal; fan-out children get
/// their own tokens so a lost race never cancels the whole run.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<SignalState>,
}

impl CancellationToken {
    /// A token that has not been signalled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation without a specific cause. Equivalent to
    /// [`cancel_with`](Self::cancel_with) with
    /// [`CancelReason::RunCancelled`].
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::RunCancelled);
    }

    /// Record the reason and wake every waiter. The first reason sticks;
    /// signalling again is a no-op.
    pub fn cancel_with(&self, reason: CancelReason) {
        {
            let mut slot = self.state.reason.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason);
        }
        self.state.notify.notify_waiters();
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.reason.lock().is_some()
    }

    /// The recorded reason, once signalled.
    pub fn reason(&self) -> Option<CancelReason> {
        *self.state.reason.lock()
    }

    /// The taxonomy error a runner reports when it observes this token:
    /// always [`ErrorKind::Cancelled`], with the reason in the message.
    pub fn cancellation_error(&self) -> NodeError {
        let message = match self.reason() {
            Some(reason) => format!("invocation cancelled: {}", reason.describe()),
            None => "invocation cancelled".to_string(),
        };
        NodeError::new(ErrorKind::Cancelled, message)
    }

    /// Resolves once the token is signalled; immediately if it already
    /// was.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clones_observe_signal_and_reason() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        assert!(clone.reason().is_none());

        token.cancel_with(CancelReason::DeadlineExceeded);
        assert!(clone.is_cancelled());
        assert_eq!(clone.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_first_reason_sticks() {
        let token = CancellationToken::new();
        token.cancel_with(CancelReason::LostRace);
        token.cancel_with(CancelReason::RunCancelled);
        assert_eq!(token.reason(), Some(CancelReason::LostRace));
    }

    #[test]
    fn test_cancellation_error_carries_reason() {
        let token = CancellationToken::new();
        let bare = token.cancellation_error();
        assert_eq!(bare.kind, ErrorKind::Cancelled);
        assert_eq!(bare.message, "invocation cancelled");

        token.cancel_with(CancelReason::LostRace);
        let raced = token.cancellation_error();
        assert_eq!(raced.kind, ErrorKind::Cancelled);
        assert!(raced.message.contains("sibling won"));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel_with(CancelReason::RunFailing);
        assert_eq!(handle.await.unwrap(), Some(CancelReason::RunFailing));
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
        assert_eq!(token.reason(), Some(CancelReason::RunCancelled));
    }
}
