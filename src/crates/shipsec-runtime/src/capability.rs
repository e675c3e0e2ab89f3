//! Per-invocation capability object.
//!
//! Components never reach for process-global singletons; everything they
//! may touch outside their own inputs arrives through a [`Capabilities`]
//! value scoped to the invocation (tenant, run id, node id). This keeps
//! components decoupled from the engine and makes log and progress
//! events correlate for free.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::secrets::SecretsProvider;

/// Severity of a run-scoped log event. `Progress` is the monotone
/// progress channel surfaced separately in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Progress,
}

/// One structured log event attributed to a node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub run_id: String,
    pub node_id: String,
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Sink receiving run-scoped log events.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

/// Sink that forwards events to `tracing` only. The default when no
/// persistent sink is attached.
#[derive(Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, event: LogEvent) {
        match event.level {
            LogLevel::Debug => {
                tracing::debug!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
            LogLevel::Info | LogLevel::Progress => {
                tracing::info!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
            LogLevel::Warn => {
                tracing::warn!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
            LogLevel::Error => {
                tracing::error!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
        }
    }
}

/// Sink that buffers events in memory; used by tests and the log
/// streaming endpoint.
#[derive(Default)]
pub struct CollectingLogSink {
    events: RwLock<Vec<LogEvent>>,
}

impl CollectingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.read().clone()
    }
}

impl LogSink for CollectingLogSink {
    fn emit(&self, event: LogEvent) {
        self.events.write().push(event);
    }
}

/// The capability object handed to every invocation.
#[derive(Clone)]
pub struct Capabilities {
    /// Tenant the run belongs to.
    pub tenant_id: String,
    /// Run correlation id.
    pub run_id: String,
    /// Node correlation id.
    pub node_id: String,
    /// Secrets provider scoped to the tenant.
    pub secrets: Arc<dyn SecretsProvider>,
    /// Artifact store scoped to the run.
    pub artifacts: Arc<dyn ArtifactStore>,
    sink: Arc<dyn LogSink>,
}

impl Capabilities {
    /// Build capabilities for one invocation.
    pub fn new(
        tenant_id: impl Into<String>,
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        secrets: Arc<dyn SecretsProvider>,
        artifacts: Arc<dyn ArtifactStore>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            secrets,
            artifacts,
            sink,
        }
    }

    /// Re-scope the same capability set to another node (used for
    /// fan-out children).
    pub fn for_node(&self, node_id: impl Into<String>) -> Self {
        let mut caps = self.clone();
        caps.node_id = node_id.into();
        caps
    }

    /// Emit a structured log event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.emit(LogEvent {
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
            level,
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Emit a monotone progress notification.
    pub fn emit_progress(&self, message: impl Into<String>) {
        self.log(LogLevel::Progress, message);
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("tenant_id", &self.tenant_id)
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifacts;
    use crate::secrets::MemorySecrets;

    fn test_caps(sink: Arc<CollectingLogSink>) -> Capabilities {
        Capabilities::new(
            "tenant-1",
            "run-1",
            "node-1",
            MemorySecrets::new().into_shared(),
            MemoryArtifacts::new().into_shared(),
            sink,
        )
    }

    #[test]
    fn test_log_events_are_attributed() {
        let sink = Arc::new(CollectingLogSink::new());
        let caps = test_caps(sink.clone());
        caps.log(LogLevel::Info, "scanning started");
        caps.emit_progress("10/100 hosts");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].run_id, "run-1");
        assert_eq!(events[0].node_id, "node-1");
        assert_eq!(events[1].level, LogLevel::Progress);
    }

    #[test]
    fn test_for_node_rescopes() {
        let sink = Arc::new(CollectingLogSink::new());
        let caps = test_caps(sink.clone());
        let child = caps.for_node("node-1#3");
        child.log(LogLevel::Info, "child event");
        assert_eq!(sink.events()[0].node_id, "node-1#3");
    }
}
