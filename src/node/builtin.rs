/// Builtin node behaviors
///
/// One function per node type, invoked through the registry dispatch table.
/// Parameter expressions are resolved per item against the execution context;
/// every behavior returns a mapping of output-slot name to ordered items.

use crate::error::{EngineError, Result};
use crate::expression::{
    self, filter_data, merge_input_data, sort_data, ExecutionContext, MergeStrategy, SortDirection,
};
use crate::node::descriptor::NodeDescriptor;
use crate::node::registry::{NodeInputs, NodeOutputs};
use mlua::LuaSerdeExt;
use serde_json::{json, Value};
use std::collections::HashMap;

fn single_output(items: Vec<Value>) -> NodeOutputs {
    let mut outputs = HashMap::new();
    outputs.insert("main".to_string(), items);
    outputs
}

fn required_str(descriptor: &NodeDescriptor, parameters: &Value, name: &str) -> Result<String> {
    descriptor
        .parameter(parameters, name)
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "node type '{}' requires string parameter '{name}'",
                descriptor.name
            ))
        })
}

/// Trigger nodes ignore input items and emit the execution's initial data
/// on their single output.
pub fn trigger(ctx: &ExecutionContext) -> Result<NodeOutputs> {
    Ok(single_output(ctx.items.as_ref().clone()))
}

/// transform.set: resolve the `fields` object per item and shallow-merge it
/// into each item.
pub fn set(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
    ctx: &ExecutionContext,
) -> Result<NodeOutputs> {
    let fields = descriptor
        .parameter(parameters, "fields")
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "node type '{}' requires parameter 'fields'",
                descriptor.name
            ))
        })?;

    let mut out = Vec::with_capacity(inputs.main().len());
    for (index, item) in inputs.main().iter().enumerate() {
        let resolved = expression::resolve_value(&fields, &ctx.item(index))?;
        let mut item = item.clone();
        match (&mut item, resolved) {
            (Value::Object(target), Value::Object(fields)) => {
                for (k, v) in fields {
                    target.insert(k, v);
                }
            }
            // A non-object item is replaced by the resolved fields wholesale.
            (slot, resolved) => *slot = resolved,
        }
        out.push(item);
    }
    Ok(single_output(out))
}

/// transform.code: run a Lua script over the whole item array.
///
/// The script sees `items`, `vars` and `params` and returns the new item
/// array (a single returned value is wrapped). Dangerous globals are removed,
/// the same sandbox tier the expression engine uses.
pub fn code(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
    ctx: &ExecutionContext,
) -> Result<NodeOutputs> {
    let script = required_str(descriptor, parameters, "script")?;

    let lua = mlua::Lua::new();
    let lua_err = |e: mlua::Error| EngineError::Expression(format!("lua: {e}"));

    let globals = lua.globals();
    for name in ["os", "io", "debug", "package", "require", "dofile", "load", "loadfile"] {
        globals.set(name, mlua::Nil).map_err(lua_err)?;
    }
    globals
        .set("items", lua.to_value(inputs.main()).map_err(lua_err)?)
        .map_err(lua_err)?;
    globals
        .set("vars", lua.to_value(ctx.vars.as_ref()).map_err(lua_err)?)
        .map_err(lua_err)?;
    globals
        .set("params", lua.to_value(ctx.params.as_ref()).map_err(lua_err)?)
        .map_err(lua_err)?;

    let result: mlua::Value = lua
        .load(&script)
        .eval()
        .map_err(|e| EngineError::Expression(format!("lua script failed: {e}")))?;
    let result: Value = lua.from_value(result).map_err(lua_err)?;

    let items = match result {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    Ok(single_output(items))
}

/// transform.filter: keep items whose condition is truthy, preserving order.
pub fn filter(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
    ctx: &ExecutionContext,
) -> Result<NodeOutputs> {
    let condition = required_str(descriptor, parameters, "condition")?;
    let kept = filter_data(inputs.main(), strip_delimiters(&condition), ctx)?;
    Ok(single_output(kept))
}

/// transform.sort: stable sort by field.
pub fn sort(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
) -> Result<NodeOutputs> {
    let field = required_str(descriptor, parameters, "field")?;
    let direction = match descriptor.parameter(parameters, "direction").as_ref().and_then(Value::as_str) {
        Some("desc") => SortDirection::Desc,
        _ => SortDirection::Asc,
    };
    Ok(single_output(sort_data(inputs.main(), &field, direction)))
}

/// http.request: one outbound request per input item, url/headers/body
/// resolved per item. Network-bound, so the executor wraps it in the node
/// timeout.
pub async fn http_request(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
    ctx: &ExecutionContext,
) -> Result<NodeOutputs> {
    let client = reqwest::Client::new();
    let mut out = Vec::with_capacity(inputs.main().len());

    for (index, _) in inputs.main().iter().enumerate() {
        let item = ctx.item(index);
        let url = expression::resolve_value(
            &Value::String(required_str(descriptor, parameters, "url")?),
            &item,
        )?;
        let url = url
            .as_str()
            .ok_or_else(|| EngineError::Validation("'url' must resolve to a string".to_string()))?
            .to_string();
        let method = descriptor
            .parameter(parameters, "method")
            .and_then(|v| v.as_str().map(|s| s.to_uppercase()))
            .unwrap_or_else(|| "GET".to_string());

        let mut request = match method.as_str() {
            "GET" => client.get(&url),
            "POST" => client.post(&url),
            "PUT" => client.put(&url),
            "PATCH" => client.patch(&url),
            "DELETE" => client.delete(&url),
            other => {
                return Err(EngineError::Validation(format!(
                    "unsupported HTTP method: {other}"
                )))
            }
        };

        if let Some(Value::Object(headers)) = descriptor.parameter(parameters, "headers") {
            for (key, value) in headers {
                if let Value::String(resolved) =
                    expression::resolve_value(&value, &item)?
                {
                    request = request.header(&key, resolved);
                } else if let Some(s) = value.as_str() {
                    request = request.header(&key, s);
                }
            }
        }

        if let Some(body) = descriptor.parameter(parameters, "body") {
            let body = expression::resolve_value(&body, &item)?;
            if !body.is_null() {
                request = request.json(&body);
            }
        }

        tracing::debug!("🌐 HTTP {} {}", method, url);
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::NodeExecution {
                node_id: String::new(),
                message: format!("http request failed: {e}"),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| EngineError::NodeExecution {
            node_id: String::new(),
            message: format!("failed to read response body: {e}"),
        })?;
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        out.push(json!({
            "status": status.as_u16(),
            "success": status.is_success(),
            "data": data,
        }));
    }

    Ok(single_output(out))
}

/// branch.if: partition items onto the "true"/"false" outputs by condition.
/// An item never appears on both outputs.
pub fn branch_if(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
    ctx: &ExecutionContext,
) -> Result<NodeOutputs> {
    let condition = required_str(descriptor, parameters, "condition")?;
    let condition = strip_delimiters(&condition);

    let mut truthy = Vec::new();
    let mut falsy = Vec::new();
    for (index, item) in inputs.main().iter().enumerate() {
        let outcome = expression::evaluate(condition, &ctx.item(index))?;
        if expression::is_truthy(&outcome) {
            truthy.push(item.clone());
        } else {
            falsy.push(item.clone());
        }
    }

    let mut outputs = HashMap::new();
    outputs.insert("true".to_string(), truthy);
    outputs.insert("false".to_string(), falsy);
    Ok(outputs)
}

/// merge.join: combine declared inputs per the configured strategy,
/// respecting declared input order.
pub fn merge_join(
    descriptor: &NodeDescriptor,
    parameters: &Value,
    inputs: &NodeInputs,
) -> Result<NodeOutputs> {
    let strategy = match descriptor.parameter(parameters, "strategy").as_ref().and_then(Value::as_str) {
        Some("merge") => MergeStrategy::Merge,
        Some("combine") => MergeStrategy::Combine,
        _ => MergeStrategy::Append,
    };
    Ok(single_output(merge_input_data(&inputs.slots, strategy)))
}

/// Conditions arrive either bare or `{{ ... }}`-delimited; evaluation wants
/// the bare expression.
pub(crate) fn strip_delimiters(expr: &str) -> &str {
    let trimmed = expr.trim();
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.len() >= 4 {
        trimmed[2..trimmed.len() - 2].trim()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExecutionMeta;
    use crate::node::registry::{NodeRegistry, NodeType};
    use crate::workflow::ExecutionMode;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(items: Vec<Value>) -> ExecutionContext {
        ExecutionContext {
            items: Arc::new(items),
            node_outputs: Arc::new(HashMap::new()),
            vars: Arc::new(serde_json::Map::new()),
            params: Arc::new(serde_json::Map::new()),
            execution: Arc::new(ExecutionMeta {
                id: "exec-1".to_string(),
                workflow_id: "wf-1".to_string(),
                mode: ExecutionMode::Manual,
            }),
            run_index: 0,
        }
    }

    #[tokio::test]
    async fn set_merges_resolved_fields_per_item() {
        let registry = NodeRegistry::new();
        let items = vec![json!({"score": 10}), json!({"score": 20})];
        let inputs = NodeInputs::single(items.clone());
        let ctx = ctx(items);
        let outputs = registry
            .run(
                NodeType::Set,
                &json!({"fields": {"doubled": "{{ item.score * 2 }}"}}),
                &inputs,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(outputs["main"][0], json!({"score": 10, "doubled": 20}));
        assert_eq!(outputs["main"][1], json!({"score": 20, "doubled": 40}));
    }

    #[tokio::test]
    async fn code_returns_new_item_array() {
        let registry = NodeRegistry::new();
        let items = vec![json!({"n": 1}), json!({"n": 2})];
        let inputs = NodeInputs::single(items.clone());
        let ctx = ctx(items);
        let outputs = registry
            .run(
                NodeType::Code,
                &json!({"script": "local out = {} for i, it in ipairs(items) do out[i] = { n = it.n * 10 } end return out"}),
                &inputs,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(outputs["main"], vec![json!({"n": 10}), json!({"n": 20})]);
    }

    #[tokio::test]
    async fn code_error_surfaces_as_engine_error() {
        let registry = NodeRegistry::new();
        let inputs = NodeInputs::single(vec![json!({})]);
        let ctx = ctx(vec![json!({})]);
        let err = registry
            .run(NodeType::Code, &json!({"script": "error('boom')"}), &inputs, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn branch_partitions_items_without_overlap() {
        let registry = NodeRegistry::new();
        let items = vec![json!({"n": 1}), json!({"n": 5}), json!({"n": 9})];
        let inputs = NodeInputs::single(items.clone());
        let ctx = ctx(items);
        let outputs = registry
            .run(
                NodeType::If,
                &json!({"condition": "item.n > 4"}),
                &inputs,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(outputs["true"], vec![json!({"n": 5}), json!({"n": 9})]);
        assert_eq!(outputs["false"], vec![json!({"n": 1})]);
    }

    #[tokio::test]
    async fn join_append_respects_declared_input_order() {
        let registry = NodeRegistry::new();
        let inputs = NodeInputs {
            slots: vec![
                ("x".to_string(), vec![json!({"from": "x"})]),
                ("y".to_string(), vec![json!({"from": "y"})]),
            ],
        };
        let ctx = ctx(vec![]);
        let outputs = registry
            .run(NodeType::Join, &json!({"strategy": "append"}), &inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(
            outputs["main"],
            vec![json!({"from": "x"}), json!({"from": "y"})]
        );
    }

    #[tokio::test]
    async fn filter_keeps_truthy_items_in_order() {
        let registry = NodeRegistry::new();
        let items = vec![json!({"keep": true}), json!({"keep": false}), json!({"keep": true})];
        let inputs = NodeInputs::single(items.clone());
        let ctx = ctx(items);
        let outputs = registry
            .run(NodeType::Filter, &json!({"condition": "$json.keep"}), &inputs, &ctx)
            .await
            .unwrap();
        assert_eq!(outputs["main"].len(), 2);
    }
}
