//! Log sink persisting run-scoped events to `execution_logs`.
//!
//! `LogSink::emit` is synchronous, so events are handed to a writer
//! task over a channel; the task owns the only database access. Events
//! also fan out to `tracing` so operators see them without querying.

use tokio::sync::mpsc;

use shipsec_runtime::{LogEvent, LogLevel, LogSink};

use crate::db::repositories::LogRepository;
use crate::db::DatabasePool;

/// Sink forwarding events to the database writer task.
pub struct DbLogSink {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl DbLogSink {
    /// Spawn the writer task and return the sink.
    pub fn spawn(pool: DatabasePool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let level = level_label(event.level);
                if let Err(error) = LogRepository::append(
                    &pool,
                    &event.run_id,
                    &event.node_id,
                    level,
                    &event.message,
                    &event.at.to_rfc3339(),
                )
                .await
                {
                    tracing::warn!(%error, "failed to persist execution log event");
                }
            }
        });
        Self { tx }
    }
}

impl LogSink for DbLogSink {
    fn emit(&self, event: LogEvent) {
        match event.level {
            LogLevel::Error => {
                tracing::error!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
            LogLevel::Warn => {
                tracing::warn!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
            _ => {
                tracing::debug!(run_id = %event.run_id, node_id = %event.node_id, "{}", event.message)
            }
        }
        let _ = self.tx.send(event);
    }
}

pub(crate) fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
        LogLevel::Progress => "progress",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_pool;
    use chrono::Utc;

    #[tokio::test]
    async fn test_events_reach_the_table() {
        let pool = test_pool().await;
        let sink = DbLogSink::spawn(pool.clone());
        sink.emit(LogEvent {
            run_id: "run-1".to_string(),
            node_id: "scan".to_string(),
            level: LogLevel::Progress,
            message: "10/100 hosts".to_string(),
            at: Utc::now(),
        });

        // The writer task drains asynchronously.
        for _ in 0..50 {
            let rows = LogRepository::list_after(&pool, "run-1", 0).await.unwrap();
            if !rows.is_empty() {
                assert_eq!(rows[0].level, "progress");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("log event never persisted");
    }
}
