/// Node type catalog and dispatch
///
/// Node types are a closed enum resolved from exact dotted names by a table
/// built once at startup; unknown names fail explicitly. Transform dispatch
/// is a match over the enum, invoking the builtin behaviors.

use crate::error::{EngineError, Result};
use crate::expression::ExecutionContext;
use crate::node::builtin;
use crate::node::descriptor::{
    NodeDescriptor, NodeKind, ParameterKind, ParameterSpec, ValidationIssue,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Closed set of builtin node types
///
/// Serialized as exact dotted names; the catalog covers every capability
/// variant without aiming for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Manual trigger, originates manual executions
    #[serde(rename = "manual.trigger")]
    ManualTrigger,
    /// Schedule trigger, entry point for cron-fired executions
    #[serde(rename = "schedule.trigger")]
    ScheduleTrigger,
    /// Webhook trigger, entry point for webhook-fired executions
    #[serde(rename = "webhook.trigger")]
    WebhookTrigger,
    /// Set or overwrite fields on each item
    #[serde(rename = "transform.set")]
    Set,
    /// Lua script over the whole item array
    #[serde(rename = "transform.code")]
    Code,
    /// Keep items matching a predicate expression
    #[serde(rename = "transform.filter")]
    Filter,
    /// Stable sort by field
    #[serde(rename = "transform.sort")]
    Sort,
    /// Outbound HTTP request per item
    #[serde(rename = "http.request")]
    HttpRequest,
    /// Partition items onto "true"/"false" outputs
    #[serde(rename = "branch.if")]
    If,
    /// Combine N inputs per a declared strategy
    #[serde(rename = "merge.join")]
    Join,
}

/// Ordered named input slots handed to a transform
///
/// For single-input nodes this is one "main" slot; for merges it is every
/// declared input in declared connection order.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    pub slots: Vec<(String, Vec<Value>)>,
}

impl NodeInputs {
    pub fn single(items: Vec<Value>) -> Self {
        Self { slots: vec![("main".to_string(), items)] }
    }

    /// Items of the "main" slot (or the first slot as fallback).
    pub fn main(&self) -> &[Value] {
        self.slots
            .iter()
            .find(|(name, _)| name == "main")
            .or_else(|| self.slots.first())
            .map(|(_, items)| items.as_slice())
            .unwrap_or(&[])
    }

    /// All items across all slots, in slot order.
    pub fn all_items(&self) -> Vec<Value> {
        self.slots.iter().flat_map(|(_, items)| items.iter().cloned()).collect()
    }

    /// Total items across all slots.
    pub fn len(&self) -> usize {
        self.slots.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output items keyed by output slot name
pub type NodeOutputs = HashMap<String, Vec<Value>>;

const TRIGGER_DESCRIPTOR_PARAMS: &[ParameterSpec] = &[];

static DESCRIPTORS: &[(NodeType, NodeDescriptor)] = &[
    (
        NodeType::ManualTrigger,
        NodeDescriptor {
            name: "manual.trigger",
            kind: NodeKind::Trigger,
            inputs: &[],
            outputs: &["main"],
            parameters: TRIGGER_DESCRIPTOR_PARAMS,
        },
    ),
    (
        NodeType::ScheduleTrigger,
        NodeDescriptor {
            name: "schedule.trigger",
            kind: NodeKind::Trigger,
            inputs: &[],
            outputs: &["main"],
            parameters: TRIGGER_DESCRIPTOR_PARAMS,
        },
    ),
    (
        NodeType::WebhookTrigger,
        NodeDescriptor {
            name: "webhook.trigger",
            kind: NodeKind::Trigger,
            inputs: &[],
            outputs: &["main"],
            parameters: &[ParameterSpec {
                name: "path",
                kind: ParameterKind::String,
                required: false,
                default: None,
            }],
        },
    ),
    (
        NodeType::Set,
        NodeDescriptor {
            name: "transform.set",
            kind: NodeKind::Transform,
            inputs: &["main"],
            outputs: &["main"],
            parameters: &[ParameterSpec {
                name: "fields",
                kind: ParameterKind::Json,
                required: true,
                default: None,
            }],
        },
    ),
    (
        NodeType::Code,
        NodeDescriptor {
            name: "transform.code",
            kind: NodeKind::Transform,
            inputs: &["main"],
            outputs: &["main"],
            parameters: &[ParameterSpec {
                name: "script",
                kind: ParameterKind::String,
                required: true,
                default: None,
            }],
        },
    ),
    (
        NodeType::Filter,
        NodeDescriptor {
            name: "transform.filter",
            kind: NodeKind::Transform,
            inputs: &["main"],
            outputs: &["main"],
            parameters: &[ParameterSpec {
                name: "condition",
                kind: ParameterKind::String,
                required: true,
                default: None,
            }],
        },
    ),
    (
        NodeType::Sort,
        NodeDescriptor {
            name: "transform.sort",
            kind: NodeKind::Transform,
            inputs: &["main"],
            outputs: &["main"],
            parameters: &[
                ParameterSpec {
                    name: "field",
                    kind: ParameterKind::String,
                    required: true,
                    default: None,
                },
                ParameterSpec {
                    name: "direction",
                    kind: ParameterKind::Enum(&["asc", "desc"]),
                    required: false,
                    default: Some("\"asc\""),
                },
            ],
        },
    ),
    (
        NodeType::HttpRequest,
        NodeDescriptor {
            name: "http.request",
            kind: NodeKind::Transform,
            inputs: &["main"],
            outputs: &["main"],
            parameters: &[
                ParameterSpec {
                    name: "url",
                    kind: ParameterKind::String,
                    required: true,
                    default: None,
                },
                ParameterSpec {
                    name: "method",
                    kind: ParameterKind::Enum(&["GET", "POST", "PUT", "PATCH", "DELETE"]),
                    required: false,
                    default: Some("\"GET\""),
                },
                ParameterSpec {
                    name: "headers",
                    kind: ParameterKind::Json,
                    required: false,
                    default: None,
                },
                ParameterSpec {
                    name: "body",
                    kind: ParameterKind::Json,
                    required: false,
                    default: None,
                },
            ],
        },
    ),
    (
        NodeType::If,
        NodeDescriptor {
            name: "branch.if",
            kind: NodeKind::Branch,
            inputs: &["main"],
            outputs: &["true", "false"],
            parameters: &[ParameterSpec {
                name: "condition",
                kind: ParameterKind::String,
                required: true,
                default: None,
            }],
        },
    ),
    (
        NodeType::Join,
        NodeDescriptor {
            name: "merge.join",
            kind: NodeKind::Merge,
            inputs: &["main"],
            outputs: &["main"],
            parameters: &[ParameterSpec {
                name: "strategy",
                kind: ParameterKind::Enum(&["merge", "append", "combine"]),
                required: false,
                default: Some("\"append\""),
            }],
        },
    ),
];

/// Catalog of node type descriptors and their executable behavior
///
/// Built once at startup; resolution is an exact dotted-name match.
#[derive(Debug)]
pub struct NodeRegistry {
    by_name: HashMap<&'static str, NodeType>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        let by_name = DESCRIPTORS
            .iter()
            .map(|(node_type, descriptor)| (descriptor.name, *node_type))
            .collect();
        Self { by_name }
    }

    /// Resolve an exact dotted type name, failing explicitly on unknown types.
    pub fn resolve(&self, name: &str) -> Result<NodeType> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::NotFound(format!("unknown node type '{name}'")))
    }

    /// Descriptor for a node type.
    pub fn descriptor(&self, node_type: NodeType) -> &'static NodeDescriptor {
        match DESCRIPTORS.iter().find(|(t, _)| *t == node_type) {
            Some((_, descriptor)) => descriptor,
            None => unreachable!("descriptor table covers the closed NodeType enum"),
        }
    }

    /// All registered type names, for catalog listings.
    pub fn type_names(&self) -> Vec<&'static str> {
        DESCRIPTORS.iter().map(|(_, d)| d.name).collect()
    }

    /// Graph-save-time configuration validation. Returns a list of issues
    /// and never fails: an unknown type is itself an issue.
    pub fn validate_configuration(&self, type_name: &str, parameters: &Value) -> Vec<ValidationIssue> {
        match self.resolve(type_name) {
            Ok(node_type) => self.descriptor(node_type).validate_parameters(parameters),
            Err(_) => vec![ValidationIssue {
                parameter: "type".to_string(),
                error: format!("unknown node type '{type_name}'"),
            }],
        }
    }

    /// Invoke a node's transform: input slots in, output slots out.
    ///
    /// Execution-time failures surface as [`EngineError::NodeExecution`] at
    /// the call site in the executor, which attaches the node id.
    pub async fn run(
        &self,
        node_type: NodeType,
        parameters: &Value,
        inputs: &NodeInputs,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutputs> {
        let descriptor = self.descriptor(node_type);
        match node_type {
            NodeType::ManualTrigger | NodeType::ScheduleTrigger | NodeType::WebhookTrigger => {
                builtin::trigger(ctx)
            }
            NodeType::Set => builtin::set(descriptor, parameters, inputs, ctx),
            NodeType::Code => builtin::code(descriptor, parameters, inputs, ctx),
            NodeType::Filter => builtin::filter(descriptor, parameters, inputs, ctx),
            NodeType::Sort => builtin::sort(descriptor, parameters, inputs),
            NodeType::HttpRequest => builtin::http_request(descriptor, parameters, inputs, ctx).await,
            NodeType::If => builtin::branch_if(descriptor, parameters, inputs, ctx),
            NodeType::Join => builtin::merge_join(descriptor, parameters, inputs),
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_exact_dotted_names() {
        let registry = NodeRegistry::new();
        assert_eq!(registry.resolve("transform.set").unwrap(), NodeType::Set);
        assert_eq!(registry.resolve("merge.join").unwrap(), NodeType::Join);
    }

    #[test]
    fn unknown_type_fails_explicitly() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.resolve("transform.bogus"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn validate_configuration_flags_unknown_type_without_throwing() {
        let registry = NodeRegistry::new();
        let issues = registry.validate_configuration("no.such.type", &json!({}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].parameter, "type");
    }

    #[test]
    fn validate_configuration_checks_declared_schema() {
        let registry = NodeRegistry::new();
        let issues = registry.validate_configuration("transform.sort", &json!({"direction": "asc"}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].parameter, "field");
    }

    #[test]
    fn branch_descriptor_declares_both_outputs() {
        let registry = NodeRegistry::new();
        let descriptor = registry.descriptor(NodeType::If);
        assert_eq!(descriptor.outputs, &["true", "false"]);
        assert_eq!(descriptor.kind, NodeKind::Branch);
    }
}
