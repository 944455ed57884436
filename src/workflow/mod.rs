/// Workflow Management Layer
///
/// Graph definitions, compiled petgraph DAGs and the hot-swap registry:
/// - Type definitions (WorkflowGraph, NodeDef, Connection, execution records)
/// - Compilation and validation (cycles rejected at save time)
/// - Lock-free registry using ArcSwap for zero-downtime updates

// Core workflow type definitions
pub mod types;

// Petgraph compilation and validation
pub mod graph;

// Hot-swap registry using ArcSwap
pub mod registry;

pub use graph::CompiledGraph;
pub use registry::WorkflowRegistry;
pub use types::{
    Connection, ExecutionMode, ExecutionStatus, NodeDef, NodeExecutionResult, NodeRunStatus,
    WorkflowExecution, WorkflowGraph,
};
