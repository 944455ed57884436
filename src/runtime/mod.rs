/// Runtime Layer
///
/// The graph executor and the in-memory tracker that owns execution
/// records and their cancellation tokens.

pub mod executor;
pub mod tracker;

pub use executor::WorkflowExecutor;
pub use tracker::ExecutionTracker;
