/// Workflow Graph Executor
///
/// Rounds-based DAG traversal. Each round schedules every node whose
/// predecessors are all terminal, runs the runnable ones concurrently on a
/// JoinSet under a per-node timeout, and folds their outputs back into the
/// collected state. Empty inputs skip a node and the skip cascades; a
/// failing node aborts the run unless it opted into continue_on_fail. The
/// whole traversal runs under the execution timeout, and every terminal
/// path returns a finalized record rather than an error.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{StatusBroadcaster, StatusEvent};
use crate::expression::{filter_data, ExecutionContext, ExecutionMeta};
use crate::node::builtin::strip_delimiters;
use crate::node::{NodeInputs, NodeKind, NodeOutputs, NodeRegistry};
use crate::runtime::tracker::ExecutionTracker;
use crate::workflow::graph::CompiledGraph;
use crate::workflow::types::{
    ExecutionStatus, NodeDef, NodeExecutionResult, NodeRunStatus, WorkflowExecution,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct WorkflowExecutor {
    nodes: Arc<NodeRegistry>,
    events: Arc<StatusBroadcaster>,
    tracker: Arc<ExecutionTracker>,
    config: EngineConfig,
}

/// Collected traversal state: per-node terminal status and the slot
/// outputs of everything finished so far.
#[derive(Default)]
struct TraversalState {
    statuses: HashMap<String, NodeRunStatus>,
    outputs: HashMap<String, NodeOutputs>,
}

impl TraversalState {
    fn is_done(&self, node_id: &str) -> bool {
        self.statuses.contains_key(node_id)
    }

    /// Snapshot of "main" outputs, for `$node.NAME` lookups.
    fn main_snapshot(&self) -> HashMap<String, Vec<Value>> {
        self.outputs
            .iter()
            .map(|(id, slots)| (id.clone(), slots.get("main").cloned().unwrap_or_default()))
            .collect()
    }
}

impl WorkflowExecutor {
    pub fn new(
        nodes: Arc<NodeRegistry>,
        events: Arc<StatusBroadcaster>,
        tracker: Arc<ExecutionTracker>,
        config: EngineConfig,
    ) -> Self {
        Self { nodes, events, tracker, config }
    }

    /// Run a compiled graph to completion. The returned record is always
    /// terminal; failures, timeouts and cancellations are encoded in its
    /// status rather than surfaced as errors.
    pub async fn execute(
        &self,
        graph: &CompiledGraph,
        mut record: WorkflowExecution,
        cancel: CancellationToken,
    ) -> WorkflowExecution {
        let started = Utc::now();
        record.status = ExecutionStatus::Running;
        record.started_at = Some(started);
        tracing::info!(
            "🚀 Executing workflow '{}' (execution '{}', {:?})",
            record.workflow_id, record.id, record.mode
        );
        self.events.publish_execution(
            &record.id,
            StatusEvent::ExecutionStatusUpdate {
                execution_id: record.id.clone(),
                workflow_id: record.workflow_id.clone(),
                status: ExecutionStatus::Running,
                error: None,
            },
        );

        let execution_timeout = Duration::from_secs(self.config.execution_timeout_secs);
        let outcome =
            tokio::time::timeout(execution_timeout, self.traverse(graph, &mut record, &cancel))
                .await;

        match outcome {
            Ok(Ok(output)) => {
                record.status = ExecutionStatus::Completed;
                record.output_data = output;
                tracing::info!("✅ Execution '{}' completed", record.id);
            }
            Ok(Err(EngineError::Cancelled)) => {
                record.status = ExecutionStatus::Cancelled;
                record.error = Some("execution cancelled".to_string());
                tracing::info!("🛑 Execution '{}' cancelled", record.id);
            }
            Ok(Err(e)) => {
                record.status = ExecutionStatus::Failed;
                record.error = Some(e.to_string());
                tracing::error!("❌ Execution '{}' failed: {}", record.id, e);
            }
            Err(_) => {
                record.status = ExecutionStatus::Timeout;
                record.error = Some(format!(
                    "execution timed out after {}ms",
                    execution_timeout.as_millis()
                ));
                tracing::error!("❌ Execution '{}' timed out", record.id);
            }
        }

        let finished = Utc::now();
        record.finished_at = Some(finished);
        record.duration_ms = Some((finished - started).num_milliseconds());

        self.events.publish_execution(
            &record.id,
            StatusEvent::ExecutionStatusUpdate {
                execution_id: record.id.clone(),
                workflow_id: record.workflow_id.clone(),
                status: record.status,
                error: record.error.clone(),
            },
        );
        self.events.publish_workflow(
            &record.workflow_id,
            StatusEvent::WorkflowExecutionUpdate {
                execution_id: record.id.clone(),
                workflow_id: record.workflow_id.clone(),
                status: record.status,
            },
        );
        record
    }

    /// The rounds loop. Returns the concatenated "main" outputs of the
    /// graph's leaf nodes, or the fatal error that aborted the run.
    async fn traverse(
        &self,
        graph: &CompiledGraph,
        record: &mut WorkflowExecution,
        cancel: &CancellationToken,
    ) -> crate::error::Result<Vec<Value>> {
        let mut state = TraversalState::default();
        let node_timeout = Duration::from_secs(self.config.node_timeout_secs);

        loop {
            if cancel.is_cancelled() {
                self.skip_unfinished(graph, record, &mut state);
                return Err(EngineError::Cancelled);
            }

            let ready: Vec<&NodeDef> = graph
                .node_ids()
                .filter(|id| !state.is_done(id))
                .filter(|id| {
                    graph
                        .incoming(id)
                        .iter()
                        .all(|conn| state.is_done(&conn.source))
                })
                .filter_map(|id| graph.node(id))
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut join: JoinSet<(NodeDef, DateTime<Utc>, NodeOutcome)> = JoinSet::new();
            let mut scheduled = 0usize;
            for node in ready {
                let inputs = self.assemble_inputs(graph, node, record, &state)?;
                let is_trigger =
                    self.nodes.descriptor(node.node_type).kind == NodeKind::Trigger;
                if !is_trigger && self.should_skip(node, &inputs) {
                    self.finish_node(
                        record,
                        &mut state,
                        node.id.clone(),
                        NodeRunStatus::Skipped,
                        NodeOutputs::new(),
                        None,
                        Utc::now(),
                    );
                    continue;
                }

                scheduled += 1;
                let ctx = self.context_for(graph, node, record, &state, inputs.all_items());
                let registry = Arc::clone(&self.nodes);
                let node = node.clone();
                join.spawn(async move {
                    let start = Utc::now();
                    let outcome = match tokio::time::timeout(
                        node_timeout,
                        registry.run(node.node_type, &node.parameters, &inputs, &ctx),
                    )
                    .await
                    {
                        Ok(Ok(outputs)) => NodeOutcome::Success(outputs),
                        Ok(Err(e)) => NodeOutcome::Error(e.to_string()),
                        Err(_) => NodeOutcome::Error(format!(
                            "node timed out after {}ms",
                            node_timeout.as_millis()
                        )),
                    };
                    (node, start, outcome)
                });
            }

            if scheduled == 0 {
                continue;
            }

            // Cancellation is advisory: in-flight nodes run to completion
            // and the pre-round check above stops the next round.
            while let Some(joined) = join.join_next().await {
                let (node, start, outcome) = match joined {
                    Ok(task) => task,
                    Err(e) => {
                        join.abort_all();
                        return Err(EngineError::NodeExecution {
                            node_id: "unknown".to_string(),
                            message: e.to_string(),
                        });
                    }
                };

                match outcome {
                    NodeOutcome::Success(outputs) => {
                        self.finish_node(
                            record,
                            &mut state,
                            node.id,
                            NodeRunStatus::Success,
                            outputs,
                            None,
                            start,
                        );
                    }
                    NodeOutcome::Error(message) if node.continue_on_fail => {
                        // The error itself becomes the node's single item
                        // so downstream nodes can route on it.
                        let mut outputs = NodeOutputs::new();
                        outputs
                            .insert("main".to_string(), vec![json!({ "error": message.clone() })]);
                        tracing::warn!(
                            "⚠️ Node '{}' failed ({}), continuing",
                            node.id, message
                        );
                        self.finish_node(
                            record,
                            &mut state,
                            node.id,
                            NodeRunStatus::Error,
                            outputs,
                            Some(message),
                            start,
                        );
                    }
                    NodeOutcome::Error(message) => {
                        self.finish_node(
                            record,
                            &mut state,
                            node.id.clone(),
                            NodeRunStatus::Error,
                            NodeOutputs::new(),
                            Some(message.clone()),
                            start,
                        );
                        join.abort_all();
                        return Err(EngineError::NodeExecution { node_id: node.id, message });
                    }
                }
            }
        }

        let mut output = Vec::new();
        for leaf in graph.leaf_ids() {
            if let Some(items) = state.outputs.get(leaf).and_then(|slots| slots.get("main")) {
                output.extend(items.iter().cloned());
            }
        }
        Ok(output)
    }

    /// Gather a node's input slots from its incoming connections.
    ///
    /// Slots appear in first-declaration order and each slot concatenates
    /// its connections' items in declared connection order, never in
    /// upstream completion order. Edge conditions filter items before they
    /// enter the slot. Triggers have no incoming connections and read the
    /// execution's input items instead.
    fn assemble_inputs(
        &self,
        graph: &CompiledGraph,
        node: &NodeDef,
        record: &WorkflowExecution,
        state: &TraversalState,
    ) -> crate::error::Result<NodeInputs> {
        let incoming = graph.incoming(&node.id);
        if incoming.is_empty() {
            // Only triggers read the execution input. A detached non-trigger
            // node gets nothing, and the empty-input skip takes over.
            if self.nodes.descriptor(node.node_type).kind == NodeKind::Trigger {
                return Ok(NodeInputs::single(record.input_data.clone()));
            }
            return Ok(NodeInputs::default());
        }

        let mut inputs = NodeInputs::default();
        for conn in incoming {
            let mut items: Vec<Value> = state
                .outputs
                .get(&conn.source)
                .and_then(|slots| slots.get(&conn.source_output))
                .cloned()
                .unwrap_or_default();
            if let Some(condition) = &conn.conditions {
                let ctx = self.context_for(graph, node, record, state, items.clone());
                items = filter_data(&items, strip_delimiters(condition), &ctx)?;
            }
            match inputs.slots.iter_mut().find(|(name, _)| name == &conn.target_input) {
                Some((_, slot)) => slot.extend(items),
                None => inputs.slots.push((conn.target_input.clone(), items)),
            }
        }
        Ok(inputs)
    }

    /// Empty input skips a node. A merge additionally skips when any of its
    /// declared input slots is empty, since its strategies need every side.
    fn should_skip(&self, node: &NodeDef, inputs: &NodeInputs) -> bool {
        if self.nodes.descriptor(node.node_type).kind == NodeKind::Merge {
            inputs.is_empty() || inputs.slots.iter().any(|(_, items)| items.is_empty())
        } else {
            inputs.is_empty()
        }
    }

    fn context_for(
        &self,
        graph: &CompiledGraph,
        node: &NodeDef,
        record: &WorkflowExecution,
        state: &TraversalState,
        items: Vec<Value>,
    ) -> ExecutionContext {
        ExecutionContext {
            items: Arc::new(items),
            node_outputs: Arc::new(state.main_snapshot()),
            vars: Arc::new(graph.workflow.vars.clone()),
            params: Arc::new(node.parameters.as_object().cloned().unwrap_or_default()),
            execution: Arc::new(ExecutionMeta {
                id: record.id.clone(),
                workflow_id: record.workflow_id.clone(),
                mode: record.mode,
            }),
            run_index: 0,
        }
    }

    /// Record one node's terminal result in the traversal state, the
    /// execution record, the tracker and the event stream.
    #[allow(clippy::too_many_arguments)]
    fn finish_node(
        &self,
        record: &mut WorkflowExecution,
        state: &mut TraversalState,
        node_id: String,
        status: NodeRunStatus,
        outputs: NodeOutputs,
        error: Option<String>,
        start: DateTime<Utc>,
    ) {
        let end = Utc::now();
        let mut output_data = serde_json::Map::new();
        for (slot, items) in &outputs {
            output_data.insert(slot.clone(), Value::Array(items.clone()));
        }
        let result = NodeExecutionResult {
            node_id: node_id.clone(),
            status,
            output_data,
            error,
            start_time: start,
            end_time: end,
            duration_ms: (end - start).num_milliseconds(),
        };

        state.statuses.insert(node_id.clone(), status);
        state.outputs.insert(node_id, outputs);
        self.tracker.record_node_result(&record.id, result.clone());
        self.events
            .publish_execution(&record.id, StatusEvent::node_update(&record.id, &result));
        record.node_results.push(result);
    }

    /// On cancellation every node without a result yet is recorded skipped.
    fn skip_unfinished(
        &self,
        graph: &CompiledGraph,
        record: &mut WorkflowExecution,
        state: &mut TraversalState,
    ) {
        let unfinished: Vec<String> = graph
            .node_ids()
            .filter(|id| !state.is_done(id))
            .map(str::to_string)
            .collect();
        for node_id in unfinished {
            self.finish_node(
                record,
                state,
                node_id,
                NodeRunStatus::Skipped,
                NodeOutputs::new(),
                None,
                Utc::now(),
            );
        }
    }
}

enum NodeOutcome {
    Success(NodeOutputs),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;
    use crate::workflow::types::{Connection, ExecutionMode, WorkflowGraph};

    fn executor() -> WorkflowExecutor {
        WorkflowExecutor::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(StatusBroadcaster::new()),
            Arc::new(ExecutionTracker::new()),
            EngineConfig {
                tick_interval_secs: 60,
                execution_timeout_secs: 10,
                node_timeout_secs: 5,
            },
        )
    }

    fn node(id: &str, node_type: NodeType, parameters: Value) -> NodeDef {
        NodeDef { id: id.to_string(), node_type, parameters, continue_on_fail: false }
    }

    fn edge(source: &str, source_output: &str, target: &str) -> Connection {
        Connection {
            source: source.to_string(),
            source_output: source_output.to_string(),
            target: target.to_string(),
            target_input: "main".to_string(),
            conditions: None,
        }
    }

    fn compile(nodes: Vec<NodeDef>, connections: Vec<Connection>) -> CompiledGraph {
        let workflow = WorkflowGraph {
            id: "wf-test".to_string(),
            name: "test".to_string(),
            nodes,
            connections,
            vars: serde_json::Map::new(),
        };
        CompiledGraph::compile(workflow, &NodeRegistry::new()).unwrap()
    }

    fn pending(input: Vec<Value>) -> WorkflowExecution {
        WorkflowExecution::pending(
            "exec-1".to_string(),
            "wf-test".to_string(),
            ExecutionMode::Manual,
            input,
        )
    }

    #[tokio::test]
    async fn linear_chain_preserves_item_order() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("tag", NodeType::Set, json!({"fields": {"tagged": true}})),
            ],
            vec![edge("start", "main", "tag")],
        );
        let input = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
        let result = executor()
            .execute(&graph, pending(input), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        let ns: Vec<i64> = result.output_data.iter().map(|i| i["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);
        assert!(result.output_data.iter().all(|i| i["tagged"] == json!(true)));
    }

    #[tokio::test]
    async fn branch_routes_each_item_to_exactly_one_side() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("split", NodeType::If, json!({"condition": "{{ $json.big }}"})),
                node("yes", NodeType::Set, json!({"fields": {"side": "big"}})),
                node("no", NodeType::Set, json!({"fields": {"side": "small"}})),
            ],
            vec![
                edge("start", "main", "split"),
                edge("split", "true", "yes"),
                edge("split", "false", "no"),
            ],
        );
        let input = vec![json!({"big": true}), json!({"big": false}), json!({"big": true})];
        let result = executor()
            .execute(&graph, pending(input), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        let big = result.output_data.iter().filter(|i| i["side"] == "big").count();
        let small = result.output_data.iter().filter(|i| i["side"] == "small").count();
        assert_eq!((big, small), (2, 1));
        assert_eq!(result.output_data.len(), 3);
    }

    #[tokio::test]
    async fn empty_input_skips_and_the_skip_cascades() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("none", NodeType::Filter, json!({"condition": "{{ false }}"})),
                node("after", NodeType::Set, json!({"fields": {"x": 1}})),
            ],
            vec![edge("start", "main", "none"), edge("none", "main", "after")],
        );
        let result = executor()
            .execute(&graph, pending(vec![json!({"a": 1})]), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        let after = result.node_results.iter().find(|r| r.node_id == "after").unwrap();
        assert_eq!(after.status, NodeRunStatus::Skipped);
        assert!(result.output_data.is_empty());
    }

    #[tokio::test]
    async fn detached_non_trigger_node_is_skipped_not_fed_the_input() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("end", NodeType::Set, json!({"fields": {"x": 1}})),
                node("stray", NodeType::Set, json!({"fields": {"leak": true}})),
            ],
            vec![edge("start", "main", "end")],
        );
        let result = executor()
            .execute(&graph, pending(vec![json!({"a": 1})]), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        let stray = result.node_results.iter().find(|r| r.node_id == "stray").unwrap();
        assert_eq!(stray.status, NodeRunStatus::Skipped);
        assert!(!result.output_data.iter().any(|i| i["leak"] == json!(true)));
    }

    #[tokio::test]
    async fn failing_node_aborts_and_names_the_node() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("boom", NodeType::Code, json!({"script": "error('kaput')"})),
                node("after", NodeType::Set, json!({"fields": {"x": 1}})),
            ],
            vec![edge("start", "main", "boom"), edge("boom", "main", "after")],
        );
        let result = executor()
            .execute(&graph, pending(vec![json!({})]), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.as_deref().unwrap_or("").contains("boom"));
        assert!(!result.node_results.iter().any(|r| r.node_id == "after"));
    }

    #[tokio::test]
    async fn continue_on_fail_emits_the_error_item_downstream() {
        let mut failing = node("boom", NodeType::Code, json!({"script": "error('kaput')"}));
        failing.continue_on_fail = true;
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                failing,
                node("after", NodeType::Set, json!({"fields": {"handled": true}})),
            ],
            vec![edge("start", "main", "boom"), edge("boom", "main", "after")],
        );
        let result = executor()
            .execute(&graph, pending(vec![json!({})]), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.output_data.len(), 1);
        assert!(result.output_data[0]["error"].as_str().unwrap().contains("kaput"));
        assert_eq!(result.output_data[0]["handled"], json!(true));
    }

    #[tokio::test]
    async fn merge_append_follows_declared_connection_order() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("split", NodeType::If, json!({"condition": "{{ $json.keep }}"})),
                node("slow", NodeType::Set, json!({"fields": {"lane": "a"}})),
                node("fast", NodeType::Set, json!({"fields": {"lane": "b"}})),
                node("joined", NodeType::Join, json!({"strategy": "append"})),
            ],
            vec![
                edge("start", "main", "split"),
                edge("split", "true", "slow"),
                edge("split", "false", "fast"),
                Connection {
                    source: "slow".to_string(),
                    source_output: "main".to_string(),
                    target: "joined".to_string(),
                    target_input: "a".to_string(),
                    conditions: None,
                },
                Connection {
                    source: "fast".to_string(),
                    source_output: "main".to_string(),
                    target: "joined".to_string(),
                    target_input: "b".to_string(),
                    conditions: None,
                },
            ],
        );
        let input = vec![json!({"keep": true}), json!({"keep": false})];
        let result = executor()
            .execute(&graph, pending(input), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        let lanes: Vec<&str> =
            result.output_data.iter().map(|i| i["lane"].as_str().unwrap()).collect();
        assert_eq!(lanes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn edge_condition_filters_items_in_transit() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("after", NodeType::Set, json!({"fields": {"seen": true}})),
            ],
            vec![Connection {
                source: "start".to_string(),
                source_output: "main".to_string(),
                target: "after".to_string(),
                target_input: "main".to_string(),
                conditions: Some("{{ $json.n > 1 }}".to_string()),
            }],
        );
        let input = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
        let result = executor()
            .execute(&graph, pending(input), CancellationToken::new())
            .await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.output_data.len(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_cancelled_with_skipped_nodes() {
        let graph = compile(
            vec![
                node("start", NodeType::ManualTrigger, json!({})),
                node("after", NodeType::Set, json!({"fields": {"x": 1}})),
            ],
            vec![edge("start", "main", "after")],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor().execute(&graph, pending(vec![json!({})]), cancel).await;

        assert_eq!(result.status, ExecutionStatus::Cancelled);
        assert!(result
            .node_results
            .iter()
            .all(|r| r.status == NodeRunStatus::Skipped));
    }
}
