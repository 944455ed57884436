/// Status Events
///
/// Per-topic broadcast channels for live execution updates. Topics are
/// `execution:{id}` and `workflow:{id}`; channels are created lazily on
/// first use and pruned once every receiver is gone. Publishing to a topic
/// nobody listens to is a no-op.

use crate::workflow::types::{ExecutionStatus, NodeExecutionResult, NodeRunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum StatusEvent {
    #[serde(rename_all = "camelCase")]
    ExecutionStatusUpdate {
        execution_id: String,
        workflow_id: String,
        status: ExecutionStatus,
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NodeExecutionUpdate {
        execution_id: String,
        node_id: String,
        node_name: String,
        status: NodeRunStatus,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        output_data: serde_json::Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Wall-clock node duration in milliseconds
        execution_time: i64,
    },
    #[serde(rename_all = "camelCase")]
    WorkflowExecutionUpdate {
        execution_id: String,
        workflow_id: String,
        status: ExecutionStatus,
    },
}

impl StatusEvent {
    /// Build a node update from a finished node result. Nodes carry no
    /// display name separate from their id, so the id serves as both.
    pub fn node_update(execution_id: &str, result: &NodeExecutionResult) -> Self {
        StatusEvent::NodeExecutionUpdate {
            execution_id: execution_id.to_string(),
            node_id: result.node_id.clone(),
            node_name: result.node_id.clone(),
            status: result.status,
            start_time: result.start_time,
            end_time: result.end_time,
            output_data: result.output_data.clone(),
            error: result.error.clone(),
            execution_time: result.duration_ms,
        }
    }
}

#[derive(Default)]
pub struct StatusBroadcaster {
    topics: Mutex<HashMap<String, broadcast::Sender<StatusEvent>>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all events for one execution. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe_execution(&self, execution_id: &str) -> broadcast::Receiver<StatusEvent> {
        self.subscribe(&format!("execution:{execution_id}"))
    }

    /// Subscribe to terminal-status events across all runs of a workflow.
    pub fn subscribe_workflow(&self, workflow_id: &str) -> broadcast::Receiver<StatusEvent> {
        self.subscribe(&format!("workflow:{workflow_id}"))
    }

    pub fn publish_execution(&self, execution_id: &str, event: StatusEvent) {
        self.publish(&format!("execution:{execution_id}"), event);
    }

    pub fn publish_workflow(&self, workflow_id: &str, event: StatusEvent) {
        self.publish(&format!("workflow:{workflow_id}"), event);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<StatusEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, topic: &str, event: StatusEvent) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = topics.get(topic) {
            if sender.send(event).is_err() {
                // Last receiver is gone, drop the channel.
                topics.remove(topic);
            }
        }
    }
}
