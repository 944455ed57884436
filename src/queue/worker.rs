/// Workflow Job Handler
///
/// Dequeue side of the engine: schedule-fire jobs fan back into the
/// schedule registry (which claims the fire and enqueues the run job);
/// workflow-run jobs resolve the workflow, register a tracked execution
/// and drive the graph executor to a terminal record. Throughput counters
/// feed the engine's health snapshot.

use crate::error::{EngineError, Result};
use crate::queue::{JobHandler, JobPayload, JOB_SCHEDULE_FIRE, JOB_WORKFLOW_RUN};
use crate::runtime::{ExecutionTracker, WorkflowExecutor};
use crate::schedule::ScheduleRegistry;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{ExecutionMode, ExecutionStatus, WorkflowExecution};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifetime throughput counters for the worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
}

/// Point-in-time view of [`WorkerStats`]
#[derive(Debug, Clone, Copy)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
}

impl WorkerStats {
    pub fn record(&self, succeeded: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
        }
    }
}

pub struct WorkflowJobHandler {
    workflows: Arc<WorkflowRegistry>,
    schedules: Arc<ScheduleRegistry>,
    executor: Arc<WorkflowExecutor>,
    tracker: Arc<ExecutionTracker>,
    stats: Arc<WorkerStats>,
}

impl WorkflowJobHandler {
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        schedules: Arc<ScheduleRegistry>,
        executor: Arc<WorkflowExecutor>,
        tracker: Arc<ExecutionTracker>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self { workflows, schedules, executor, tracker, stats }
    }

    async fn run_workflow_job(&self, payload: JobPayload) -> Result<()> {
        let graph = self.workflows.require(&payload.workflow_id)?;
        let mode = if payload.schedule_id.is_some() {
            ExecutionMode::Scheduled
        } else {
            ExecutionMode::Manual
        };

        let record = WorkflowExecution::pending(
            payload.execution_id.clone(),
            payload.workflow_id.clone(),
            mode,
            payload.input.clone(),
        );
        let cancel = self.tracker.insert_pending(record.clone());

        tracing::info!(
            "📥 Processing run job for workflow '{}' (execution '{}')",
            payload.workflow_id, payload.execution_id
        );
        let result = self.executor.execute(&graph, record, cancel).await;
        let succeeded = result.status == ExecutionStatus::Completed;
        self.tracker.finalize(result);
        self.stats.record(succeeded);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for WorkflowJobHandler {
    async fn handle(&self, job_type: &str, payload: JobPayload) -> Result<()> {
        match job_type {
            JOB_SCHEDULE_FIRE => {
                let schedule_id = payload.schedule_id.clone().ok_or_else(|| {
                    EngineError::QueueDelivery {
                        job_id: payload.execution_id.clone(),
                        message: "schedule-fire job without a schedule id".to_string(),
                    }
                })?;
                self.schedules.execute_scheduled_workflow(&schedule_id).await?;
                Ok(())
            }
            JOB_WORKFLOW_RUN => self.run_workflow_job(payload).await,
            other => Err(EngineError::QueueDelivery {
                job_id: payload.execution_id,
                message: format!("unknown job type '{other}'"),
            }),
        }
    }
}
