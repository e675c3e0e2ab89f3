//! # shipsec-runtime - Component Runtime
//!
//! Dispatches a single node invocation on the runner its component
//! declares and normalizes logs, progress, artifacts, secrets, and
//! results across all three strategies:
//!
//! - **Inline** ([`inline`]) - in-process components for transforms,
//!   AI-provider glue, and human gates; panics are captured and surfaced
//!   as typed failures.
//! - **Container** ([`container`]) - one isolated named volume per
//!   invocation, DinD-safe, with guaranteed volume removal on every exit
//!   path and stdout result-envelope parsing.
//! - **Remote** ([`remote`]) - HTTP dispatch with the response status
//!   projected into the shared error taxonomy.
//!
//! Components receive their environment through a per-invocation
//! [`Capabilities`] object (logger, progress, secrets, artifacts,
//! tenant) rather than globals, and signal long-running suspensions by
//! returning [`Outcome::Pending`].

pub mod artifacts;
pub mod cancel;
pub mod capability;
pub mod components;
pub mod container;
pub mod inline;
pub mod invoke;
pub mod remote;
pub mod runtime;
pub mod secrets;

pub use artifacts::{ArtifactHandle, ArtifactScope, ArtifactStore, MemoryArtifacts};
pub use cancel::{CancelReason, CancellationToken};
pub use capability::{Capabilities, CollectingLogSink, LogEvent, LogLevel, LogSink, TracingLogSink};
pub use container::ContainerRunner;
pub use inline::{ComponentCall, InlineComponent, InlineRegistry};
pub use invoke::{InvocationRequest, Outcome, SuspensionKind, SuspensionRequest};
pub use remote::RemoteRunner;
pub use runtime::ComponentRuntime;
pub use secrets::{MemorySecrets, SecretValue, SecretsProvider};
