//! Cron scheduler: fires due schedules as `schedule` triggers.
//!
//! A single tick task scans enabled schedules on an interval and starts
//! a run for every cron occurrence that fell inside the elapsed window.
//! The tick is stateless across restarts; occurrences that fell while
//! the server was down are not replayed.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::time::Duration;

use shipsec_engine::TriggerInfo;

use crate::db::repositories::ScheduleRepository;
use crate::service::AppState;

/// Occurrences of `expression` in the half-open window `(from, to]`.
pub fn due_in_window(
    expression: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, String> {
    let schedule = CronSchedule::from_str(expression)
        .map_err(|e| format!("invalid cron expression '{}': {}", expression, e))?;
    Ok(schedule
        .after(&from)
        .take_while(|occurrence| *occurrence <= to)
        .collect())
}

/// Spawn the scheduler tick loop.
pub fn spawn(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut last_tick = Utc::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if let Err(error) = run_tick(&state, last_tick, now).await {
                tracing::warn!(%error, "scheduler tick failed");
            }
            last_tick = now;
        }
    });
}

async fn run_tick(
    state: &AppState,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<(), String> {
    let schedules = ScheduleRepository::list_enabled(&state.pool)
        .await
        .map_err(|e| e.to_string())?;
    for schedule in schedules {
        let due = match due_in_window(&schedule.cron, from, to) {
            Ok(due) => due,
            Err(error) => {
                tracing::warn!(schedule = %schedule.id, %error, "skipping schedule");
                continue;
            }
        };
        for occurrence in due {
            let inputs = serde_json::from_str(&schedule.inputs).unwrap_or_default();
            match state
                .start_run(
                    &schedule.workflow_id,
                    inputs,
                    None,
                    None,
                    TriggerInfo::schedule(&schedule.id),
                )
                .await
            {
                Ok(run_id) => {
                    tracing::info!(
                        schedule = %schedule.id,
                        run_id = %run_id,
                        at = %occurrence,
                        "schedule fired"
                    );
                }
                Err(error) => {
                    tracing::warn!(schedule = %schedule.id, %error, "scheduled run failed to start");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_due_in_window() {
        // Every minute at second zero.
        let from = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 30).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 8, 1, 12, 3, 0).unwrap();
        let due = due_in_window("0 * * * * *", from, to).unwrap();
        assert_eq!(due.len(), 3);
        assert_eq!(due[0], Utc.with_ymd_and_hms(2026, 8, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn test_empty_window_and_bad_expression() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert!(due_in_window("0 * * * * *", at, at).unwrap().is_empty());
        assert!(due_in_window("not cron", at, at).is_err());
    }
}
