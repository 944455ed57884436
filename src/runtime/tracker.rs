/// Execution Tracker
///
/// In-memory registry of execution records, live and terminal. The executor
/// registers a pending record before running, receives the cancellation
/// token for it, and finalizes the record when the run ends. Terminal
/// records are immutable.

use crate::error::{EngineError, Result};
use crate::workflow::types::{ExecutionStatus, NodeExecutionResult, WorkflowExecution};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct TrackedExecution {
    record: WorkflowExecution,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct ExecutionTracker {
    executions: RwLock<HashMap<String, TrackedExecution>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending record and hand back the token the executor
    /// should observe.
    pub fn insert_pending(&self, record: WorkflowExecution) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut executions = self.executions.write().unwrap_or_else(|e| e.into_inner());
        executions.insert(
            record.id.clone(),
            TrackedExecution { record, cancel: cancel.clone() },
        );
        cancel
    }

    /// Replace a live record with its final form. A record already
    /// terminal is left untouched (a cancel may have finalized it first).
    pub fn finalize(&self, record: WorkflowExecution) {
        let mut executions = self.executions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(tracked) = executions.get_mut(&record.id) {
            if !tracked.record.status.is_terminal() {
                tracked.record = record;
            }
        }
    }

    pub fn status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        executions
            .get(execution_id)
            .map(|tracked| tracked.record.status)
            .ok_or_else(|| EngineError::NotFound(format!("execution '{execution_id}'")))
    }

    pub fn results(&self, execution_id: &str) -> Result<WorkflowExecution> {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        executions
            .get(execution_id)
            .map(|tracked| tracked.record.clone())
            .ok_or_else(|| EngineError::NotFound(format!("execution '{execution_id}'")))
    }

    /// Mark a live run for cancellation. Returns false when the execution
    /// is unknown or already terminal.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        match executions.get(execution_id) {
            Some(tracked) if !tracked.record.status.is_terminal() => {
                tracked.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Record a node result against a live run and flip it to running the
    /// first time one lands.
    pub fn record_node_result(&self, execution_id: &str, result: NodeExecutionResult) {
        let mut executions = self.executions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(tracked) = executions.get_mut(execution_id) {
            if !tracked.record.status.is_terminal() {
                tracked.record.status = ExecutionStatus::Running;
                tracked.record.node_results.push(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::ExecutionMode;

    fn pending(id: &str) -> WorkflowExecution {
        WorkflowExecution::pending(id.to_string(), "wf-1".to_string(), ExecutionMode::Manual, vec![])
    }

    #[test]
    fn terminal_records_are_immutable() {
        let tracker = ExecutionTracker::new();
        tracker.insert_pending(pending("exec-1"));

        let mut done = pending("exec-1");
        done.status = ExecutionStatus::Completed;
        tracker.finalize(done);

        let mut overwrite = pending("exec-1");
        overwrite.status = ExecutionStatus::Failed;
        tracker.finalize(overwrite);

        assert_eq!(tracker.status("exec-1").unwrap(), ExecutionStatus::Completed);
    }

    #[test]
    fn cancel_fires_the_token_for_live_runs_only() {
        let tracker = ExecutionTracker::new();
        let token = tracker.insert_pending(pending("exec-1"));
        assert!(tracker.cancel("exec-1"));
        assert!(token.is_cancelled());

        let mut done = pending("exec-2");
        done.status = ExecutionStatus::Completed;
        tracker.insert_pending(pending("exec-2"));
        tracker.finalize(done);
        assert!(!tracker.cancel("exec-2"));

        assert!(!tracker.cancel("exec-missing"));
    }

    #[test]
    fn unknown_execution_is_not_found() {
        let tracker = ExecutionTracker::new();
        assert!(matches!(
            tracker.status("nope"),
            Err(EngineError::NotFound(_))
        ));
    }
}
