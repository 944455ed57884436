/// Hot-swap workflow registry using ArcSwap
///
/// In-memory catalog of compiled workflow graph definitions the queue worker
/// resolves workflow ids against. Each update swaps the entire map pointer,
/// so reads on the execution path are lock-free and concurrent executions
/// continue uninterrupted. Definitions arrive from the external persistence
/// collaborator.

use crate::error::{EngineError, Result};
use crate::node::NodeRegistry;
use crate::workflow::graph::CompiledGraph;
use crate::workflow::types::WorkflowGraph;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Lock-free registry of compiled workflows
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Atomic pointer to the workflow map; key: workflow id
    workflows: ArcSwap<HashMap<String, Arc<CompiledGraph>>>,
    /// Node catalog used to validate definitions on upsert
    nodes: Arc<NodeRegistry>,
}

impl WorkflowRegistry {
    pub fn new(nodes: Arc<NodeRegistry>) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            nodes,
        }
    }

    /// Compile, validate and register (or replace) a workflow definition.
    ///
    /// Validation happens here, at save time: bad configurations and cyclic
    /// graphs never reach the registry.
    pub fn upsert(&self, workflow: WorkflowGraph) -> Result<Arc<CompiledGraph>> {
        let id = workflow.id.clone();
        let compiled = Arc::new(CompiledGraph::compile(workflow, &self.nodes)?);

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(id.clone(), Arc::clone(&compiled));
        self.workflows.store(Arc::new(next));

        tracing::info!("🔥 Registered workflow: {}", id);
        Ok(compiled)
    }

    /// Get a compiled workflow by id (lock-free read).
    pub fn get(&self, workflow_id: &str) -> Option<Arc<CompiledGraph>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Get a compiled workflow, failing with NotFound on unknown ids.
    pub fn require(&self, workflow_id: &str) -> Result<Arc<CompiledGraph>> {
        self.get(workflow_id)
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{workflow_id}'")))
    }

    /// Remove a workflow from the registry.
    pub fn remove(&self, workflow_id: &str) -> bool {
        let current = self.workflows.load();
        if !current.contains_key(workflow_id) {
            return false;
        }
        let mut next = (**current).clone();
        next.remove(workflow_id);
        self.workflows.store(Arc::new(next));
        tracing::info!("🗑️ Removed workflow from registry: {}", workflow_id);
        true
    }

    /// List all registered workflow ids.
    pub fn list_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }
}
