/// Expression & Data Transformation Engine
///
/// Pure evaluation of delimited expressions against a read-only per-item
/// context, plus array-level operations (filter/sort/merge/paginate/
/// coerce/validate) used by the builtin nodes.

// Per-node, per-item evaluation context
pub mod context;

// Accessor and Lua expression evaluation
pub mod eval;

// Array-level data operations
pub mod transform;

pub use context::{ExecutionContext, ExecutionMeta, ItemContext};
pub use eval::{evaluate, is_truthy, resolve_string, resolve_value};
pub use transform::{
    filter_data, merge_input_data, paginate_data, sort_data, transform_data_types, validate_data,
    DataIssue, FieldRule, MergeStrategy, Page, SortDirection, TargetType,
};
