/// Read-only expression evaluation context
///
/// Derived per node from the executor's collected state, then viewed per
/// item. Evaluation never mutates the context.

use crate::workflow::ExecutionMode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Execution-level metadata visible to expressions as `$execution.*`
#[derive(Debug, Clone)]
pub struct ExecutionMeta {
    pub id: String,
    pub workflow_id: String,
    pub mode: ExecutionMode,
}

/// Per-node evaluation context, immutable once built
///
/// Holds the node's input items, the upstream node outputs collected so far,
/// workflow variables and the node's static parameters. Cloning is cheap:
/// all payloads are Arc-wrapped.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Input items of the node currently executing
    pub items: Arc<Vec<Value>>,
    /// Upstream node "main" outputs by node id, visible as `$node.NAME`
    pub node_outputs: Arc<HashMap<String, Vec<Value>>>,
    /// Workflow variables, visible as `$vars.*`
    pub vars: Arc<serde_json::Map<String, Value>>,
    /// The node's static (unresolved) parameters, visible as `$params.*`
    pub params: Arc<serde_json::Map<String, Value>>,
    pub execution: Arc<ExecutionMeta>,
    /// Re-entry counter; always 0 until bounded loop constructs exist
    pub run_index: u32,
}

impl ExecutionContext {
    /// View this context through one item.
    pub fn item(&self, index: usize) -> ItemContext<'_> {
        ItemContext { ctx: self, index }
    }

    /// Context for operations that are not item-scoped (e.g. whole-array
    /// transforms); behaves like item 0.
    pub fn head(&self) -> ItemContext<'_> {
        self.item(0)
    }
}

/// One-item view of an [`ExecutionContext`]
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub ctx: &'a ExecutionContext,
    pub index: usize,
}

impl ItemContext<'_> {
    /// The current item, or Null when the index is out of range.
    pub fn current(&self) -> &Value {
        self.ctx.items.get(self.index).unwrap_or(&Value::Null)
    }
}
