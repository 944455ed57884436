/// Schedule Registry
///
/// Owns schedule records: creation, mutation, deletion, next-fire
/// computation and the arming of delayed queue jobs. Every mutation
/// recomputes next_execution and re-arms (or disarms) the queued job under
/// the stable id `schedule-{id}`, so repeated arming replaces rather than
/// duplicates pending work.

use crate::error::{EngineError, Result};
use crate::queue::{EnqueueOptions, ExecutionQueue, JobPayload, JOB_SCHEDULE_FIRE, JOB_WORKFLOW_RUN};
use crate::schedule::cron;
use crate::schedule::store::ScheduleStore;
use crate::schedule::types::{Schedule, ScheduleUpdate};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct ScheduleRegistry {
    store: ScheduleStore,
    queue: Arc<dyn ExecutionQueue>,
}

impl ScheduleRegistry {
    pub fn new(store: ScheduleStore, queue: Arc<dyn ExecutionQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a schedule.
    ///
    /// Fails with InvalidCronExpression on bad syntax and with Conflict when
    /// the workflow already has an active schedule. next_execution is the
    /// first occurrence strictly after now in the schedule's timezone.
    pub async fn create_schedule(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        timezone: Option<&str>,
        is_active: bool,
    ) -> Result<Schedule> {
        cron::parse(cron_expression)?;
        let tz = cron::parse_timezone(timezone)?;
        let timezone = tz.name().to_string();

        if is_active {
            if let Some(existing) = self.store.active_for_workflow(workflow_id).await? {
                return Err(EngineError::Conflict(format!(
                    "workflow '{workflow_id}' already has active schedule '{}'",
                    existing.id
                )));
            }
        }

        let next = cron::next_occurrence(cron_expression, &timezone, Utc::now())?;
        let mut schedule = Schedule {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            cron_expression: cron_expression.to_string(),
            timezone,
            is_active,
            next_execution: Some(next),
            last_execution: None,
            execution_count: 0,
            armed_job_id: None,
        };
        self.store.insert(&schedule).await?;

        if schedule.is_active {
            self.arm(&mut schedule).await?;
            self.store.update(&schedule).await?;
        }

        tracing::info!(
            "⏰ Created schedule '{}' for workflow '{}' (next: {:?})",
            schedule.id, schedule.workflow_id, schedule.next_execution
        );
        Ok(schedule)
    }

    /// Apply a partial update, recomputing next_execution when cron or
    /// timezone change and re-arming (or disarming) the queued job.
    pub async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<Schedule> {
        let mut schedule = self.require(id).await?;

        let timing_changed =
            update.cron_expression.is_some() || update.timezone.is_some();

        if let Some(expression) = update.cron_expression {
            cron::parse(&expression)?;
            schedule.cron_expression = expression;
        }
        if let Some(timezone) = update.timezone {
            let tz = cron::parse_timezone(Some(&timezone))?;
            schedule.timezone = tz.name().to_string();
        }
        if let Some(active) = update.is_active {
            if active && !schedule.is_active {
                if let Some(existing) = self.store.active_for_workflow(&schedule.workflow_id).await? {
                    if existing.id != schedule.id {
                        return Err(EngineError::Conflict(format!(
                            "workflow '{}' already has active schedule '{}'",
                            schedule.workflow_id, existing.id
                        )));
                    }
                }
            }
            schedule.is_active = active;
        }

        if timing_changed || schedule.next_execution.is_none() {
            schedule.next_execution = Some(cron::next_occurrence(
                &schedule.cron_expression,
                &schedule.timezone,
                Utc::now(),
            )?);
        }

        if schedule.is_active {
            self.arm(&mut schedule).await?;
        } else {
            self.disarm(&mut schedule).await?;
        }
        self.store.update(&schedule).await?;

        tracing::info!("⏰ Updated schedule '{}' (active: {})", schedule.id, schedule.is_active);
        Ok(schedule)
    }

    pub async fn activate_schedule(&self, id: &str) -> Result<Schedule> {
        self.update_schedule(id, ScheduleUpdate { is_active: Some(true), ..Default::default() })
            .await
    }

    pub async fn deactivate_schedule(&self, id: &str) -> Result<Schedule> {
        self.update_schedule(id, ScheduleUpdate { is_active: Some(false), ..Default::default() })
            .await
    }

    /// Cancel the queued job, then remove the record.
    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let mut schedule = self.require(id).await?;
        self.disarm(&mut schedule).await?;
        self.store.delete(id).await?;
        tracing::info!("🗑️ Deleted schedule '{}'", id);
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Schedule> {
        self.require(id).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.store.list().await
    }

    /// Active schedules with next_execution at or before now. Used by the
    /// clock tick.
    pub async fn due_schedules(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Schedule>> {
        self.store.due(now).await
    }

    /// Fire a due schedule: enqueue a run job, optimistically advance
    /// last/next/count and re-arm the next delayed job.
    ///
    /// The advance is a compare-and-set against the stored next_execution;
    /// when a concurrent scheduler instance wins the claim this returns
    /// Ok(None) and enqueues nothing, so a schedule never double-fires.
    pub async fn execute_scheduled_workflow(&self, schedule_id: &str) -> Result<Option<String>> {
        let mut schedule = self.require(schedule_id).await?;
        if !schedule.is_active {
            return Ok(None);
        }
        let expected_next = match schedule.next_execution {
            Some(next) => next,
            None => return Ok(None),
        };

        let now = Utc::now();
        let after = expected_next.max(now);
        let new_next =
            cron::next_occurrence(&schedule.cron_expression, &schedule.timezone, after)?;

        if !self.store.claim_advance(schedule_id, expected_next, new_next, now).await? {
            tracing::debug!("⏭️ Lost fire claim for schedule '{}', another instance won", schedule_id);
            return Ok(None);
        }

        let execution_id = Uuid::new_v4().to_string();
        self.queue
            .enqueue(
                JOB_WORKFLOW_RUN,
                JobPayload {
                    schedule_id: Some(schedule.id.clone()),
                    workflow_id: schedule.workflow_id.clone(),
                    execution_id: execution_id.clone(),
                    execution_time: now,
                    priority: None,
                    input: Vec::new(),
                },
                EnqueueOptions { job_id: Some(execution_id.clone()), ..Default::default() },
            )
            .await?;

        schedule.last_execution = Some(now);
        schedule.execution_count += 1;
        schedule.next_execution = Some(new_next);
        self.arm(&mut schedule).await?;
        self.store.update(&schedule).await?;

        tracing::info!(
            "🚀 Fired schedule '{}' (execution '{}', next: {})",
            schedule_id, execution_id, new_next
        );
        Ok(Some(execution_id))
    }

    async fn require(&self, id: &str) -> Result<Schedule> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("schedule '{id}'")))
    }

    /// Arm the delayed fire job keyed by the stable `schedule-{id}` job id.
    /// Re-adding under the same id replaces the pending job.
    async fn arm(&self, schedule: &mut Schedule) -> Result<()> {
        let next = match schedule.next_execution {
            Some(next) => next,
            None => return Ok(()),
        };
        let job_id = format!("schedule-{}", schedule.id);
        let delay_ms = (next - Utc::now()).num_milliseconds().max(0) as u64;
        self.queue
            .enqueue(
                JOB_SCHEDULE_FIRE,
                JobPayload {
                    schedule_id: Some(schedule.id.clone()),
                    workflow_id: schedule.workflow_id.clone(),
                    execution_id: Uuid::new_v4().to_string(),
                    execution_time: next,
                    priority: None,
                    input: Vec::new(),
                },
                EnqueueOptions { delay_ms, job_id: Some(job_id.clone()), ..Default::default() },
            )
            .await?;
        schedule.armed_job_id = Some(job_id);
        Ok(())
    }

    async fn disarm(&self, schedule: &mut Schedule) -> Result<()> {
        if let Some(job_id) = schedule.armed_job_id.take() {
            self.queue.remove(&job_id).await?;
        }
        Ok(())
    }
}
