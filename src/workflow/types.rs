/// Core workflow type definitions
///
/// Defines the graph structures consumed by the executor (nodes, connections)
/// and the execution records it produces. Graph definitions arrive as JSON
/// from the external persistence collaborator; execution records are owned by
/// the executor until terminal.

use crate::node::NodeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete workflow graph definition
///
/// Workflows are directed graphs of typed nodes connected through named
/// output/input slots. Graphs are compiled into petgraph DAGs (and validated
/// for cycles) before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Unique workflow identifier (e.g. "wf-orders")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    pub nodes: Vec<NodeDef>,
    /// List of connections routing node outputs to node inputs
    pub connections: Vec<Connection>,
    /// User-defined workflow variables, visible to expressions as `$vars.*`
    #[serde(default)]
    pub vars: serde_json::Map<String, Value>,
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    /// Unique node identifier within the workflow (e.g. "n1", "fetch-orders")
    pub id: String,
    /// The node type, resolved against the node registry catalog
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Node-specific configuration parameters, validated against the type's
    /// declared parameter schema at graph-save time
    #[serde(default)]
    pub parameters: Value,
    /// When set, a failing transform records an error result and the
    /// execution continues instead of finalizing as failed
    #[serde(default)]
    pub continue_on_fail: bool,
}

/// A connection routing one node's named output to another node's named input
///
/// Multiple connections may feed one target slot; their items are concatenated
/// in declared connection order, never completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Source node id
    pub source: String,
    /// Source output slot (default: "main")
    #[serde(default = "default_slot")]
    pub source_output: String,
    /// Target node id
    pub target: String,
    /// Target input slot (default: "main")
    #[serde(default = "default_slot")]
    pub target_input: String,
    /// Optional per-edge predicate expression; when present, only items whose
    /// predicate evaluates truthy traverse the edge
    #[serde(default)]
    pub conditions: Option<String>,
}

fn default_slot() -> String {
    "main".to_string()
}

/// Lifecycle status of a workflow execution
///
/// Transitions pending → running → terminal; terminal records are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// How an execution was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Manual,
    Webhook,
    Scheduled,
    Retry,
    ErrorWorkflow,
}

/// Outcome of a single node within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Success,
    Error,
    Skipped,
}

/// Per-node execution record with timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: NodeRunStatus,
    /// Output items keyed by output slot name
    pub output_data: serde_json::Map<String, Value>,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

/// A complete workflow execution record
///
/// Created when a dequeued job begins processing and owned by the executor
/// until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub mode: ExecutionMode,
    /// Items handed to the trigger node
    pub input_data: Vec<Value>,
    /// Concatenated outputs of the graph's leaf nodes
    pub output_data: Vec<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Per-node results in completion order
    pub node_results: Vec<NodeExecutionResult>,
}

impl WorkflowExecution {
    /// Create a fresh pending record for a dequeued job.
    pub fn pending(id: String, workflow_id: String, mode: ExecutionMode, input: Vec<Value>) -> Self {
        Self {
            id,
            workflow_id,
            status: ExecutionStatus::Pending,
            mode,
            input_data: input,
            output_data: Vec::new(),
            error: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            node_results: Vec::new(),
        }
    }
}
