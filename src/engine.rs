/// Engine Façade
///
/// Wires the schedule store, queue, workflow registry, executor, tracker
/// and event broadcaster into one daemon-shaped surface: workflow and
/// schedule management, manual runs, ad-hoc node execution, execution
/// queries, cancellation, event subscriptions and a health snapshot.

use crate::config::Config;
use crate::error::Result;
use crate::events::{StatusBroadcaster, StatusEvent};
use crate::expression::{ExecutionContext, ExecutionMeta};
use crate::node::{NodeInputs, NodeOutputs, NodeRegistry};
use crate::queue::{
    EnqueueOptions, ExecutionQueue, JobPayload, MemoryQueue, WorkerStats, WorkflowJobHandler,
    JOB_WORKFLOW_RUN,
};
use crate::runtime::{ExecutionTracker, WorkflowExecutor};
use crate::schedule::{CronClock, Schedule, ScheduleRegistry, ScheduleStore, ScheduleUpdate};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{ExecutionMode, ExecutionStatus, WorkflowExecution, WorkflowGraph};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Coarse engine health classification derived from worker throughput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub processed: u64,
    pub succeeded: u64,
    pub success_rate: f64,
}

/// One request in an [`Engine::execute_batch`] call
#[derive(Debug, Clone)]
pub struct NodeRunRequest {
    pub type_name: String,
    pub parameters: Value,
    pub items: Vec<Value>,
}

pub struct Engine {
    config: Config,
    nodes: Arc<NodeRegistry>,
    workflows: Arc<WorkflowRegistry>,
    schedules: Arc<ScheduleRegistry>,
    queue: Arc<MemoryQueue>,
    tracker: Arc<ExecutionTracker>,
    events: Arc<StatusBroadcaster>,
    stats: Arc<WorkerStats>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Assemble and start the engine: schema init, queue worker loop and
    /// the cron safety-net clock.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database.schedule_db_url)
            .await?;
        let store = ScheduleStore::new(pool);
        store.init_schema().await?;

        let queue = MemoryQueue::new(config.queue.clone());
        let nodes = Arc::new(NodeRegistry::new());
        let workflows = Arc::new(WorkflowRegistry::new(Arc::clone(&nodes)));
        let schedules = Arc::new(ScheduleRegistry::new(
            store,
            Arc::clone(&queue) as Arc<dyn ExecutionQueue>,
        ));
        let tracker = Arc::new(ExecutionTracker::new());
        let events = Arc::new(StatusBroadcaster::new());
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&nodes),
            Arc::clone(&events),
            Arc::clone(&tracker),
            config.engine.clone(),
        ));
        let stats = Arc::new(WorkerStats::default());
        let handler = Arc::new(WorkflowJobHandler::new(
            Arc::clone(&workflows),
            Arc::clone(&schedules),
            executor,
            Arc::clone(&tracker),
            Arc::clone(&stats),
        ));

        let shutdown = CancellationToken::new();
        let worker = queue.start(handler, shutdown.child_token());
        let clock = CronClock::new(Arc::clone(&schedules), config.engine.tick_interval_secs)
            .start(shutdown.child_token());

        tracing::info!("🚀 Engine started");
        Ok(Self {
            config,
            nodes,
            workflows,
            schedules,
            queue,
            tracker,
            events,
            stats,
            shutdown,
            tasks: Mutex::new(vec![worker, clock]),
        })
    }

    /// Stop the queue worker and the clock, waiting for both loops.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("🛑 Engine stopped");
    }

    // Workflow management

    pub fn register_workflow(&self, workflow: WorkflowGraph) -> Result<()> {
        self.workflows.upsert(workflow)?;
        Ok(())
    }

    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        self.workflows.remove(workflow_id)
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.workflows.list_ids()
    }

    // Schedule management

    pub async fn create_schedule(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        timezone: Option<&str>,
        is_active: bool,
    ) -> Result<Schedule> {
        self.schedules
            .create_schedule(workflow_id, cron_expression, timezone, is_active)
            .await
    }

    pub async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<Schedule> {
        self.schedules.update_schedule(id, update).await
    }

    pub async fn activate_schedule(&self, id: &str) -> Result<Schedule> {
        self.schedules.activate_schedule(id).await
    }

    pub async fn deactivate_schedule(&self, id: &str) -> Result<Schedule> {
        self.schedules.deactivate_schedule(id).await
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        self.schedules.delete_schedule(id).await
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Schedule> {
        self.schedules.get_schedule(id).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.schedules.list_schedules().await
    }

    // Execution

    /// Queue a manual run. The job id doubles as the execution id so a
    /// still-queued run can be cancelled by id.
    pub async fn run_workflow(&self, workflow_id: &str, input: Vec<Value>) -> Result<String> {
        self.workflows.require(workflow_id)?;
        let execution_id = Uuid::new_v4().to_string();
        self.queue
            .enqueue(
                JOB_WORKFLOW_RUN,
                JobPayload {
                    schedule_id: None,
                    workflow_id: workflow_id.to_string(),
                    execution_id: execution_id.clone(),
                    execution_time: Utc::now(),
                    priority: None,
                    input,
                },
                EnqueueOptions { job_id: Some(execution_id.clone()), ..Default::default() },
            )
            .await?;
        tracing::info!("📤 Queued manual run of '{}' as '{}'", workflow_id, execution_id);
        Ok(execution_id)
    }

    /// Run a single node ad hoc, outside any workflow.
    pub async fn execute_node(
        &self,
        type_name: &str,
        parameters: &Value,
        items: Vec<Value>,
    ) -> Result<NodeOutputs> {
        let node_type = self.nodes.resolve(type_name)?;
        let inputs = NodeInputs::single(items);
        let ctx = ExecutionContext {
            items: Arc::new(inputs.main().to_vec()),
            node_outputs: Arc::new(HashMap::new()),
            vars: Arc::new(serde_json::Map::new()),
            params: Arc::new(parameters.as_object().cloned().unwrap_or_default()),
            execution: Arc::new(ExecutionMeta {
                id: format!("adhoc-{}", Uuid::new_v4()),
                workflow_id: String::new(),
                mode: ExecutionMode::Manual,
            }),
            run_index: 0,
        };
        self.nodes.run(node_type, parameters, &inputs, &ctx).await
    }

    /// Run several ad-hoc node requests concurrently, returning outcomes
    /// in request order.
    pub async fn execute_batch(
        &self,
        requests: Vec<NodeRunRequest>,
    ) -> Vec<Result<NodeOutputs>> {
        let mut join: JoinSet<(usize, Result<NodeOutputs>)> = JoinSet::new();
        let total = requests.len();
        for (index, request) in requests.into_iter().enumerate() {
            let nodes = Arc::clone(&self.nodes);
            join.spawn(async move {
                let outcome = match nodes.resolve(&request.type_name) {
                    Ok(node_type) => {
                        let inputs = NodeInputs::single(request.items);
                        let ctx = ExecutionContext {
                            items: Arc::new(inputs.main().to_vec()),
                            node_outputs: Arc::new(HashMap::new()),
                            vars: Arc::new(serde_json::Map::new()),
                            params: Arc::new(
                                request.parameters.as_object().cloned().unwrap_or_default(),
                            ),
                            execution: Arc::new(ExecutionMeta {
                                id: format!("adhoc-{}", Uuid::new_v4()),
                                workflow_id: String::new(),
                                mode: ExecutionMode::Manual,
                            }),
                            run_index: 0,
                        };
                        nodes.run(node_type, &request.parameters, &inputs, &ctx).await
                    }
                    Err(e) => Err(e),
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<NodeOutputs>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join.join_next().await {
            if let Ok((index, outcome)) = joined {
                outcomes[index] = Some(outcome);
            }
        }
        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    Err(crate::error::EngineError::NodeExecution {
                        node_id: "batch".to_string(),
                        message: "batch task aborted".to_string(),
                    })
                })
            })
            .collect()
    }

    pub fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        self.tracker.status(execution_id)
    }

    pub fn get_execution_results(&self, execution_id: &str) -> Result<WorkflowExecution> {
        self.tracker.results(execution_id)
    }

    /// Cancel an execution. A still-queued run is removed from the queue
    /// and never starts; a live run gets its token cancelled and finalizes
    /// as cancelled. Returns false for unknown or already-terminal runs.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<bool> {
        if self.queue.remove(execution_id).await? {
            tracing::info!("🛑 Removed queued execution '{}'", execution_id);
            return Ok(true);
        }
        Ok(self.tracker.cancel(execution_id))
    }

    // Events

    pub fn subscribe_execution(&self, execution_id: &str) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe_execution(execution_id)
    }

    pub fn subscribe_workflow(&self, workflow_id: &str) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe_workflow(workflow_id)
    }

    // Health

    /// Classify worker throughput against the configured success-rate
    /// thresholds. An engine that has processed nothing yet is healthy.
    pub fn health(&self) -> HealthSnapshot {
        let snapshot = self.stats.snapshot();
        let success_rate = if snapshot.processed == 0 {
            100.0
        } else {
            snapshot.succeeded as f64 / snapshot.processed as f64 * 100.0
        };
        let thresholds = &self.config.health;
        let status = if success_rate >= thresholds.healthy_pct {
            HealthStatus::Healthy
        } else if success_rate >= thresholds.degraded_pct {
            HealthStatus::Degraded
        } else if success_rate >= thresholds.unhealthy_pct {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Critical
        };
        HealthSnapshot {
            status,
            processed: snapshot.processed,
            succeeded: snapshot.succeeded,
            success_rate,
        }
    }
}
