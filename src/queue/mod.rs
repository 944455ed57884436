/// Execution Queue Layer
///
/// The durable queue is consumed through a narrow interface: at-least-once
/// delivery, dedup by job id (re-adding replaces the pending job), delay,
/// priority and exponential retry backoff. The crate ships an in-process
/// implementation used by the engine daemon and the tests.

// In-process queue implementation
pub mod memory;

// Dequeue-side workflow job handler
pub mod worker;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryQueue;
pub use worker::{WorkerStats, WorkerStatsSnapshot, WorkflowJobHandler};

/// Job type for the delayed schedule-fire job armed per schedule
pub const JOB_SCHEDULE_FIRE: &str = "schedule-fire";
/// Job type for a workflow run job
pub const JOB_WORKFLOW_RUN: &str = "workflow-run";

/// Queue job payload, serialized camelCase for external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    pub workflow_id: String,
    pub execution_id: String,
    pub execution_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Items handed to the trigger node of a manual run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<serde_json::Value>,
}

/// Enqueue options: delay, stable job id, priority and retry policy
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delivery delay in milliseconds
    pub delay_ms: u64,
    /// Stable job id; re-adding an existing id replaces the pending job
    pub job_id: Option<String>,
    /// Lower values deliver first among jobs due at the same instant
    pub priority: i32,
    /// Delivery attempts before permanent failure; 0 uses the queue default
    pub attempts: u32,
}

/// The consumed durable-queue interface
#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Enqueue a job (at-least-once delivery). Returns the job id.
    async fn enqueue(
        &self,
        job_type: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<String>;

    /// Cancel a job if it has not started. Returns whether a pending job was
    /// removed.
    async fn remove(&self, job_id: &str) -> Result<bool>;
}

/// Receives dequeued jobs from the queue worker loop.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_type: &str, payload: JobPayload) -> Result<()>;
}
