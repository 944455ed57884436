/// In-process execution queue
///
/// Implements the consumed queue interface with delay ordering, priority
/// tie-break, job id dedup, exponential retry backoff and a permanently
/// failed record. Delivery is at-least-once: a job is claimed out of the
/// pending set before its handler runs, so `remove` can only cancel jobs
/// that have not started.

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::{EnqueueOptions, ExecutionQueue, JobHandler, JobPayload};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PendingJob {
    id: String,
    job_type: String,
    payload: JobPayload,
    due: DateTime<Utc>,
    priority: i32,
    /// Deliveries already attempted
    attempt: u32,
    max_attempts: u32,
    seq: u64,
}

/// A job that exhausted its delivery attempts
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub id: String,
    pub job_type: String,
    pub payload: JobPayload,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, PendingJob>,
    failed: Vec<FailedJob>,
    seq: u64,
}

/// In-process durable-queue stand-in
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    config: QueueConfig,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            config,
        })
    }

    /// Spawn the delivery loop, handing claimed jobs to the handler.
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn JobHandler>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("📥 Queue worker started");
            queue.run(handler, cancel).await;
            tracing::info!("📥 Queue worker stopped");
        })
    }

    async fn run(&self, handler: Arc<dyn JobHandler>, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let claimed = self.claim_due(now);

            match claimed {
                Claim::Job(job) => self.deliver(handler.as_ref(), job).await,
                Claim::WaitUntil(due) => {
                    let wait = (due - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                Claim::Idle => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Claim the earliest due job, removing it from the pending set so a
    /// concurrent `remove` cannot cancel a started delivery.
    fn claim_due(&self, now: DateTime<Utc>) -> Claim {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let next = state
            .pending
            .values()
            .min_by_key(|job| (job.due, job.priority, job.seq))
            .map(|job| (job.id.clone(), job.due));

        match next {
            None => Claim::Idle,
            Some((_, due)) if due > now => Claim::WaitUntil(due),
            Some((id, _)) => match state.pending.remove(&id) {
                Some(job) => Claim::Job(job),
                None => Claim::Idle,
            },
        }
    }

    async fn deliver(&self, handler: &dyn JobHandler, mut job: PendingJob) {
        tracing::debug!("📤 Delivering job '{}' ({}, attempt {})", job.id, job.job_type, job.attempt + 1);

        match handler.handle(&job.job_type, job.payload.clone()).await {
            Ok(()) => {
                tracing::debug!("✅ Job '{}' handled", job.id);
            }
            Err(e) => {
                job.attempt += 1;
                if job.attempt < job.max_attempts {
                    let backoff_ms = retry_backoff_ms(self.config.backoff_base_ms, job.attempt);
                    job.due = Utc::now() + ChronoDuration::milliseconds(backoff_ms as i64);
                    tracing::warn!(
                        "🔁 Job '{}' failed (attempt {}): {} - retrying in {}ms",
                        job.id, job.attempt, e, backoff_ms
                    );
                    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                    // A replacement enqueued under the same id wins over the retry.
                    state.pending.entry(job.id.clone()).or_insert(job);
                    self.notify.notify_one();
                } else {
                    tracing::error!(
                        "❌ Job '{}' permanently failed after {} attempts: {}",
                        job.id, job.attempt, e
                    );
                    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                    state.failed.push(FailedJob {
                        id: job.id,
                        job_type: job.job_type,
                        payload: job.payload,
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
                }
            }
        }
    }

    /// Number of jobs waiting for delivery.
    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pending.len()
    }

    /// Permanently failed jobs, newest last.
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).failed.clone()
    }
}

enum Claim {
    Job(PendingJob),
    WaitUntil(DateTime<Utc>),
    Idle,
}

/// Exponential retry backoff, saturating instead of overflowing when a
/// caller configures a very large attempt budget.
fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[async_trait]
impl ExecutionQueue for MemoryQueue {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<String> {
        let job_id = options.job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_attempts = if options.attempts == 0 {
            self.config.max_attempts
        } else {
            options.attempts
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.seq += 1;
        let job = PendingJob {
            id: job_id.clone(),
            job_type: job_type.to_string(),
            payload,
            due: Utc::now() + ChronoDuration::milliseconds(options.delay_ms as i64),
            priority: options.priority,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            seq: state.seq,
        };

        // Idempotent re-arm: same id replaces the pending job.
        let replaced = state.pending.insert(job_id.clone(), job).is_some();
        drop(state);
        self.notify.notify_one();

        if replaced {
            tracing::debug!("♻️ Replaced pending job '{}' ({})", job_id, job_type);
        } else {
            tracing::debug!("📝 Enqueued job '{}' ({})", job_id, job_type);
        }
        Ok(job_id)
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let removed = state.pending.remove(job_id).is_some();
        if removed {
            tracing::debug!("🛑 Cancelled pending job '{}'", job_id);
        }
        Ok(removed)
    }
}
