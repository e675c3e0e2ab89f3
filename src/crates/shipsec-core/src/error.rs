//! Error taxonomy shared by the compiler, engine, and component runtimes
//!
//! Every failure that crosses a component boundary is classified into an
//! [`ErrorKind`]. The engine consults the kind (together with a component's
//! retry policy) to decide whether an attempt may be retried, and the API
//! layer maps kinds onto HTTP status ranges.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a node-level failure.
///
/// The kind determines default retryability:
///
/// | Kind | Retryable |
/// |---|---|
/// | `Validation` | no |
/// | `Configuration` | no |
/// | `Authentication` | no |
/// | `Transient` | yes |
/// | `RateLimited` | yes (honoring a suggested delay) |
/// | `Container` | classified at the runner into `Transient` or fatal |
/// | `Cancelled` | terminal, not a failure for reporting |
/// | `TimedOut` | terminal per policy |
/// | `Internal` | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid input or parameter value.
    Validation,
    /// Missing secret, credential, or other required configuration.
    Configuration,
    /// Upstream authentication refused.
    Authentication,
    /// Network error, HTTP 5xx, or timeout reaching a dependency.
    Transient,
    /// HTTP 429 or provider-signalled throttling.
    RateLimited,
    /// Failure reported by a container runner before classification.
    Container,
    /// The invocation was cancelled.
    Cancelled,
    /// A suspension or invocation exceeded its wall-clock budget.
    TimedOut,
    /// A bug; logged with a correlation id.
    Internal,
}

impl ErrorKind {
    /// Whether the engine may retry an error of this kind under a retry
    /// policy that has attempts remaining.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimited)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Container => "container",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// A classified node failure carried through the engine and persisted on
/// the run's per-node state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct NodeError {
    /// Taxonomy classification.
    pub kind: ErrorKind,
    /// Human-readable message. The engine prefixes the offending node id
    /// in brackets when surfacing run-level failures.
    pub message: String,
    /// Minimum delay before a retry, when the upstream suggested one
    /// (e.g. a `Retry-After` header on HTTP 429).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl NodeError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a configuration failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Shorthand for a transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Shorthand for an internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a suggested retry delay.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Render the message with the offending node in a bracketed prefix,
    /// the form surfaced on failed runs.
    pub fn prefixed(&self, node_id: &str) -> String {
        format!("[{}] {}", node_id, self.message)
    }
}

/// Errors raised by the port-contract and component registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A definition with this id is already registered.
    #[error("component '{0}' is already registered")]
    DuplicateComponent(String),

    /// A contract with this name is already registered.
    #[error("contract '{0}' is already registered")]
    DuplicateContract(String),

    /// A port references a contract that was never registered.
    #[error("contract '{0}' is not registered")]
    UnknownContract(String),

    /// A contract schema failed to compile.
    #[error("invalid schema for contract '{name}': {message}")]
    InvalidSchema { name: String, message: String },

    /// A `resolve_ports` hook violated the static shape or failed.
    #[error("dynamic ports for component '{component}': {message}")]
    DynamicPorts { component: String, message: String },
}
