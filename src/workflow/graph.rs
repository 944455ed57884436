/// Workflow graph compilation and validation
///
/// Converts a workflow definition into a petgraph DAG, rejecting cycles and
/// bad configurations at graph-save time so the executor never sees them.

use crate::error::{EngineError, Result};
use crate::node::{NodeKind, NodeRegistry};
use crate::workflow::types::{Connection, NodeDef, WorkflowGraph};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// A validated, execution-ready workflow graph
///
/// Wraps the definition with the petgraph structure and id lookups the
/// executor traverses. Construction is the single validation point:
/// an instance of this type is always acyclic with a known-good catalog
/// of node types.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    /// The validated workflow definition
    pub workflow: WorkflowGraph,
    /// Petgraph structure; node weights index into `workflow.nodes`
    graph: DiGraph<usize, usize>,
    /// Node id to graph index
    index_of: HashMap<String, NodeIndex>,
    /// Ids of trigger nodes, ready at execution start
    pub trigger_ids: Vec<String>,
}

impl CompiledGraph {
    /// Compile and validate a workflow definition.
    ///
    /// Fails with [`EngineError::Validation`] on structural problems and node
    /// configuration issues, and with [`EngineError::GraphCycle`] on cycles.
    pub fn compile(workflow: WorkflowGraph, registry: &NodeRegistry) -> Result<Self> {
        tracing::debug!(
            "🏗️ Compiling workflow '{}' ({} nodes, {} connections)",
            workflow.id,
            workflow.nodes.len(),
            workflow.connections.len()
        );

        let mut graph = DiGraph::new();
        let mut index_of: HashMap<String, NodeIndex> = HashMap::new();
        let mut trigger_ids = Vec::new();

        for (position, node) in workflow.nodes.iter().enumerate() {
            if index_of.contains_key(&node.id) {
                return Err(EngineError::Validation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }

            let descriptor = registry.descriptor(node.node_type);
            let issues = descriptor.validate_parameters(&node.parameters);
            if !issues.is_empty() {
                let detail: Vec<String> = issues
                    .iter()
                    .map(|i| format!("{}: {}", i.parameter, i.error))
                    .collect();
                return Err(EngineError::Validation(format!(
                    "node '{}' has invalid configuration: {}",
                    node.id,
                    detail.join("; ")
                )));
            }

            if descriptor.kind == NodeKind::Trigger {
                trigger_ids.push(node.id.clone());
            }

            let index = graph.add_node(position);
            index_of.insert(node.id.clone(), index);
        }

        for (position, connection) in workflow.connections.iter().enumerate() {
            let source = index_of.get(&connection.source).ok_or_else(|| {
                EngineError::Validation(format!(
                    "connection references unknown source node '{}'",
                    connection.source
                ))
            })?;
            let target = index_of.get(&connection.target).ok_or_else(|| {
                EngineError::Validation(format!(
                    "connection references unknown target node '{}'",
                    connection.target
                ))
            })?;
            graph.add_edge(*source, *target, position);
        }

        for trigger_id in &trigger_ids {
            let index = index_of[trigger_id];
            if graph.neighbors_directed(index, petgraph::Direction::Incoming).count() > 0 {
                return Err(EngineError::Validation(format!(
                    "trigger node '{trigger_id}' must not have incoming connections"
                )));
            }
        }

        if trigger_ids.is_empty() {
            return Err(EngineError::Validation(
                "workflow must have at least one trigger node".to_string(),
            ));
        }

        // Cycles are rejected here; the executor never sees one.
        if toposort(&graph, None).is_err() {
            tracing::error!("❌ Workflow '{}' contains a cycle", workflow.id);
            return Err(EngineError::GraphCycle);
        }

        Ok(Self { workflow, graph, index_of, trigger_ids })
    }

    /// Node definition by id.
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.index_of
            .get(id)
            .map(|index| &self.workflow.nodes[self.graph[*index]])
    }

    /// All node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.workflow.nodes.iter().map(|n| n.id.as_str())
    }

    /// Incoming connections of a node, in declared connection order.
    pub fn incoming(&self, id: &str) -> Vec<&Connection> {
        self.workflow
            .connections
            .iter()
            .filter(|c| c.target == id)
            .collect()
    }

    /// Whether the node has any outgoing connections.
    pub fn has_successors(&self, id: &str) -> bool {
        self.workflow.connections.iter().any(|c| c.source == id)
    }

    /// Ids of leaf nodes (no outgoing connections); their outputs form the
    /// execution's output data.
    pub fn leaf_ids(&self) -> Vec<&str> {
        self.workflow
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !self.has_successors(id))
            .collect()
    }
}
