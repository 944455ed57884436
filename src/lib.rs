/// Runway: workflow scheduling and graph execution engine
///
/// Two cooperating halves behind one façade:
/// - Schedule engine: cron parsing, a durable SQLite-backed schedule store,
///   idempotent delayed queue jobs and a periodic safety-net clock
/// - Graph executor: compiled DAG traversal with per-item expressions,
///   branch/merge routing, timeouts, cancellation and status events

// Typed error taxonomy
pub mod error;

// Environment-driven configuration
pub mod config;

// Expression evaluation and data transforms
pub mod expression;

// Node type catalog and builtin behaviors
pub mod node;

// Workflow definitions, graph compilation, hot-swap registry
pub mod workflow;

// Durable queue interface, in-process queue, job handler
pub mod queue;

// Cron schedules: parsing, store, registry, clock
pub mod schedule;

// Graph executor and execution tracker
pub mod runtime;

// Execution status broadcast
pub mod events;

// The daemon façade
pub mod engine;

pub use config::Config;
pub use engine::{Engine, HealthSnapshot, HealthStatus, NodeRunRequest};
pub use error::{EngineError, Result};
pub use events::StatusEvent;
pub use workflow::types::{
    Connection, ExecutionMode, ExecutionStatus, NodeDef, WorkflowExecution, WorkflowGraph,
};
