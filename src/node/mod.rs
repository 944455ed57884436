/// Node Registry Layer
///
/// Catalog of node type descriptors and their executable behavior:
/// - Static descriptors with closed parameter schemas
/// - Closed NodeType enum resolved by exact dotted name
/// - Builtin behaviors covering every capability variant

// Static type descriptors and parameter validation
pub mod descriptor;

// Closed type catalog and transform dispatch
pub mod registry;

// Builtin node behaviors
pub mod builtin;

pub use descriptor::{NodeDescriptor, NodeKind, ParameterKind, ParameterSpec, ValidationIssue};
pub use registry::{NodeInputs, NodeOutputs, NodeRegistry, NodeType};
