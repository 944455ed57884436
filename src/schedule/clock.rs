/// Cron Clock
///
/// Periodic safety-net scan over due schedules. The primary fire path is
/// the delayed queue job armed at creation; the clock re-fires anything
/// whose job was lost (process restart, dropped queue). The store-level
/// claim keeps the two paths from double-firing.

use crate::schedule::registry::ScheduleRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct CronClock {
    schedules: Arc<ScheduleRegistry>,
    tick_interval: Duration,
}

impl CronClock {
    pub fn new(schedules: Arc<ScheduleRegistry>, tick_interval_secs: u64) -> Self {
        Self { schedules, tick_interval: Duration::from_secs(tick_interval_secs) }
    }

    /// Spawn the tick loop. Runs until the token is cancelled.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!("⏰ Cron clock started (tick: {:?})", self.tick_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("🛑 Cron clock stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }

    /// One scan. A failing schedule is logged and skipped so it cannot
    /// stall the rest of the batch.
    async fn tick(&self) {
        let due = match self.schedules.due_schedules(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("❌ Failed to scan due schedules: {}", e);
                return;
            }
        };
        for schedule in due {
            match self.schedules.execute_scheduled_workflow(&schedule.id).await {
                Ok(Some(execution_id)) => {
                    tracing::info!(
                        "⏰ Clock fired schedule '{}' (execution '{}')",
                        schedule.id, execution_id
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("❌ Schedule '{}' failed to fire: {}", schedule.id, e);
                }
            }
        }
    }
}
