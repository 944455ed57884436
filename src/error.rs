/// Engine error taxonomy
///
/// Every fallible operation in the crate returns `Result<T, EngineError>`.
/// Node failures carry the originating node id so executions can be finalized
/// with a precise failure source; queue failures carry the job id.

use thiserror::Error;

/// Errors produced by the schedule registry, queue, executor and engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cron expression failed to parse.
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCronExpression { expression: String, message: String },

    /// Caller-visible validation failure (bad node configuration, bad timezone, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A conflicting record already exists (e.g. duplicate active schedule).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown schedule / execution / job / workflow id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A node transform failed at execution time.
    #[error("node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// Queue delivery exhausted its retry attempts.
    #[error("queue delivery failed for job '{job_id}': {message}")]
    QueueDelivery { job_id: String, message: String },

    /// The workflow graph contains a cycle. Rejected at validation time,
    /// never observed at runtime.
    #[error("workflow graph contains a cycle")]
    GraphCycle,

    /// An expression could not be resolved against its context.
    #[error("expression error: {0}")]
    Expression(String),

    /// A node or execution exceeded its configured timeout.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The execution was cancelled before completion.
    #[error("execution cancelled")]
    Cancelled,

    /// Schedule store I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
