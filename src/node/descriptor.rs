/// Node type descriptors
///
/// Every node type exposes a descriptor: its capability kind, named
/// input/output slots, and a closed parameter schema validated at
/// graph-save time. Descriptors are static data; behavior lives in
/// the registry dispatch table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability variant of a node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// No inputs, one output; originates an execution and ignores input items
    Trigger,
    /// One input, one output
    Transform,
    /// One input, N named outputs; partitions items
    Branch,
    /// N named inputs, one output; combines per a declared strategy
    Merge,
}

/// Closed set of parameter kinds a node schema may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    /// One of a fixed set of string values
    Enum(&'static [&'static str]),
    /// Arbitrary JSON (objects, arrays)
    Json,
}

/// Declared parameter of a node type
#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub required: bool,
    /// JSON-encoded default applied when the parameter is absent
    pub default: Option<&'static str>,
}

/// Static descriptor of a node type
#[derive(Debug, Clone, Copy)]
pub struct NodeDescriptor {
    /// Exact dotted type name (e.g. "transform.set")
    pub name: &'static str,
    pub kind: NodeKind,
    /// Named input slots; empty for triggers, connection-declared for merges
    pub inputs: &'static [&'static str],
    /// Named output slots
    pub outputs: &'static [&'static str],
    pub parameters: &'static [ParameterSpec],
}

/// A single configuration problem found at graph-save time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub parameter: String,
    pub error: String,
}

impl NodeDescriptor {
    /// Validate a parameter object against this descriptor's schema.
    ///
    /// Returns a list of issues and never fails: unknown types and missing
    /// required parameters are issues, not errors.
    pub fn validate_parameters(&self, parameters: &Value) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let obj = match parameters {
            Value::Null => {
                for param in self.parameters.iter().filter(|s| s.required) {
                    issues.push(ValidationIssue {
                        parameter: param.name.to_string(),
                        error: "required parameter is missing".to_string(),
                    });
                }
                return issues;
            }
            Value::Object(obj) => obj,
            _ => {
                issues.push(ValidationIssue {
                    parameter: "".to_string(),
                    error: "parameters must be a JSON object".to_string(),
                });
                return issues;
            }
        };

        for param in self.parameters {
            match obj.get(param.name) {
                None => {
                    if param.required {
                        issues.push(ValidationIssue {
                            parameter: param.name.to_string(),
                            error: "required parameter is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    if let Some(error) = check_kind(param.kind, value) {
                        issues.push(ValidationIssue {
                            parameter: param.name.to_string(),
                            error,
                        });
                    }
                }
            }
        }

        for key in obj.keys() {
            if !self.parameters.iter().any(|s| s.name == key) {
                issues.push(ValidationIssue {
                    parameter: key.clone(),
                    error: format!("unknown parameter for node type '{}'", self.name),
                });
            }
        }

        issues
    }

    /// Resolve a parameter value, falling back to the declared default.
    pub fn parameter(&self, parameters: &Value, name: &str) -> Option<Value> {
        if let Some(v) = parameters.get(name) {
            return Some(v.clone());
        }
        self.parameters
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.default)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

fn check_kind(kind: ParameterKind, value: &Value) -> Option<String> {
    match kind {
        ParameterKind::String => {
            // Expression strings are resolved at execution time, so any
            // string passes here.
            if value.is_string() {
                None
            } else {
                Some("expected a string".to_string())
            }
        }
        ParameterKind::Number => {
            if value.is_number() || is_expression(value) {
                None
            } else {
                Some("expected a number".to_string())
            }
        }
        ParameterKind::Boolean => {
            if value.is_boolean() || is_expression(value) {
                None
            } else {
                Some("expected a boolean".to_string())
            }
        }
        ParameterKind::Enum(options) => match value.as_str() {
            Some(s) if options.contains(&s) => None,
            _ => Some(format!("expected one of {:?}", options)),
        },
        ParameterKind::Json => None,
    }
}

fn is_expression(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| s.trim_start().starts_with("{{"))
        .unwrap_or(false)
}
