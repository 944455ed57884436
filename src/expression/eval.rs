/// Expression evaluation
///
/// Strings carry expressions between `{{` and `}}` delimiters. Inside the
/// delimiters, `$`-prefixed accessors are resolved by hand against the
/// per-item context; anything else is evaluated as a sandboxed single
/// Lua expression with the context injected read-only. Strings without
/// delimiters are literals. A whole-string single expression yields the raw
/// JSON value; embedded expressions stringify into the surrounding text.

use crate::error::{EngineError, Result};
use crate::expression::context::ItemContext;
use mlua::LuaSerdeExt;
use serde_json::Value;

/// Resolve a parameter value against one item.
///
/// Strings are scanned for delimited expressions; objects and arrays are
/// resolved recursively; everything else passes through unchanged.
pub fn resolve_value(value: &Value, item: &ItemContext) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(s, item),
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                out.push(resolve_value(v, item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (k, v) in obj {
                out.insert(k.clone(), resolve_value(v, item)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve a string that may contain `{{ ... }}` expressions.
pub fn resolve_string(raw: &str, item: &ItemContext) -> Result<Value> {
    let trimmed = raw.trim();

    // Whole-string single expression yields the raw JSON value.
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        let inner = &trimmed[2..trimmed.len() - 2];
        if !inner.contains("{{") && !inner.contains("}}") {
            return evaluate(inner.trim(), item);
        }
    }

    if !raw.contains("{{") {
        return Ok(Value::String(raw.to_string()));
    }

    // Embedded expressions stringify into the surrounding text.
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| EngineError::Expression(format!("unterminated expression in '{raw}'")))?;
        let resolved = evaluate(after[..end].trim(), item)?;
        out.push_str(&stringify(&resolved));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Evaluate one undelimited expression against the item context.
pub fn evaluate(expr: &str, item: &ItemContext) -> Result<Value> {
    if expr.is_empty() {
        return Err(EngineError::Expression("empty expression".to_string()));
    }
    if is_accessor(expr) {
        eval_accessor(expr, item)
    } else {
        eval_lua(expr, item)
    }
}

/// Truthiness used by filter predicates and branch conditions.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A pure `$` accessor: no operators, no calls, just a dotted path.
fn is_accessor(expr: &str) -> bool {
    expr.starts_with('$')
        && expr[1..]
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn eval_accessor(expr: &str, item: &ItemContext) -> Result<Value> {
    let (head, path) = match expr.find('.') {
        Some(i) => (&expr[..i], Some(&expr[i + 1..])),
        None => (expr, None),
    };
    let ctx = item.ctx;

    match head {
        "$json" | "$item" => match path {
            None => Ok(item.current().clone()),
            Some(p) => Ok(lookup_path(item.current(), p)),
        },
        "$items" => match path {
            None => Ok(Value::Array(ctx.items.as_ref().clone())),
            Some(p) => Ok(lookup_path(&Value::Array(ctx.items.as_ref().clone()), p)),
        },
        "$itemIndex" => Ok(Value::from(item.index as u64)),
        "$runIndex" => Ok(Value::from(ctx.run_index)),
        "$node" => {
            let path = path.ok_or_else(|| {
                EngineError::Expression("$node requires a node name ($node.NAME)".to_string())
            })?;
            let (name, field) = match path.find('.') {
                Some(i) => (&path[..i], Some(&path[i + 1..])),
                None => (path, None),
            };
            let items = ctx
                .node_outputs
                .get(name)
                .ok_or_else(|| EngineError::Expression(format!("unknown node '{name}' in $node")))?;
            match field {
                // $node.NAME yields the node's full output array;
                // $node.NAME.field looks into its first item.
                None => Ok(Value::Array(items.clone())),
                Some(f) => Ok(lookup_path(items.first().unwrap_or(&Value::Null), f)),
            }
        }
        "$vars" => {
            let path = path
                .ok_or_else(|| EngineError::Expression("$vars requires a key".to_string()))?;
            Ok(lookup_path(&Value::Object(ctx.vars.as_ref().clone()), path))
        }
        "$params" => {
            let path = path
                .ok_or_else(|| EngineError::Expression("$params requires a key".to_string()))?;
            Ok(lookup_path(&Value::Object(ctx.params.as_ref().clone()), path))
        }
        "$execution" => match path {
            Some("id") => Ok(Value::String(ctx.execution.id.clone())),
            Some("workflow_id") => Ok(Value::String(ctx.execution.workflow_id.clone())),
            Some("mode") => serde_json::to_value(ctx.execution.mode)
                .map_err(|e| EngineError::Expression(e.to_string())),
            other => Err(EngineError::Expression(format!(
                "unknown $execution field '{}'",
                other.unwrap_or("")
            ))),
        },
        other => Err(EngineError::Expression(format!("unknown accessor '{other}'"))),
    }
}

/// Dotted path lookup; numeric segments index into arrays. Missing segments
/// resolve to Null.
fn lookup_path(root: &Value, path: &str) -> Value {
    let mut current = root;
    for part in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(part).unwrap_or(&Value::Null),
            Value::Array(arr) => match part.parse::<usize>() {
                Ok(i) => arr.get(i).unwrap_or(&Value::Null),
                Err(_) => &Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate a sandboxed single Lua expression with the context injected.
///
/// Dangerous globals are removed; the context is exposed as `item`, `items`,
/// `vars`, `params`, `node`, `execution`, `item_index` and `run_index`.
fn eval_lua(expr: &str, item: &ItemContext) -> Result<Value> {
    let rewritten = rewrite_accessors(expr);
    let lua = mlua::Lua::new();
    let expr_err = |e: mlua::Error| EngineError::Expression(format!("lua: {e}"));

    let globals = lua.globals();
    for name in ["os", "io", "debug", "package", "require", "dofile", "load", "loadfile"] {
        globals.set(name, mlua::Nil).map_err(expr_err)?;
    }

    let ctx = item.ctx;
    globals
        .set("item", lua.to_value(item.current()).map_err(expr_err)?)
        .map_err(expr_err)?;
    globals
        .set("items", lua.to_value(ctx.items.as_ref()).map_err(expr_err)?)
        .map_err(expr_err)?;
    globals
        .set("vars", lua.to_value(ctx.vars.as_ref()).map_err(expr_err)?)
        .map_err(expr_err)?;
    globals
        .set("params", lua.to_value(ctx.params.as_ref()).map_err(expr_err)?)
        .map_err(expr_err)?;
    globals
        .set("node", lua.to_value(ctx.node_outputs.as_ref()).map_err(expr_err)?)
        .map_err(expr_err)?;
    let execution = lua.create_table().map_err(expr_err)?;
    execution.set("id", ctx.execution.id.clone()).map_err(expr_err)?;
    execution
        .set("workflow_id", ctx.execution.workflow_id.clone())
        .map_err(expr_err)?;
    globals.set("execution", execution).map_err(expr_err)?;
    globals.set("item_index", item.index).map_err(expr_err)?;
    globals.set("run_index", ctx.run_index).map_err(expr_err)?;

    let result: mlua::Value = lua
        .load(&rewritten)
        .eval()
        .map_err(|e| EngineError::Expression(format!("lua eval of '{expr}' failed: {e}")))?;
    lua.from_value(result).map_err(expr_err)
}

/// Lua syntax has no `$`; accessor tokens inside a Lua expression are
/// rewritten onto the injected globals before evaluation, so mixed forms
/// like `$json.score > 10` work in the Lua tier.
fn rewrite_accessors(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let end = tail
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(tail.len());
        let replacement = match &tail[..end] {
            "json" | "item" => "item",
            "items" => "items",
            "itemIndex" => "item_index",
            "runIndex" => "run_index",
            "vars" => "vars",
            "params" => "params",
            "node" => "node",
            "execution" => "execution",
            unknown => {
                out.push('$');
                out.push_str(unknown);
                rest = &tail[end..];
                continue;
            }
        };
        out.push_str(replacement);
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::context::{ExecutionContext, ExecutionMeta};
    use crate::workflow::ExecutionMode;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx(items: Vec<Value>) -> ExecutionContext {
        let mut outputs = HashMap::new();
        outputs.insert("fetch".to_string(), vec![json!({"total": 7})]);
        let mut vars = serde_json::Map::new();
        vars.insert("region".to_string(), json!("eu-west"));
        ExecutionContext {
            items: Arc::new(items),
            node_outputs: Arc::new(outputs),
            vars: Arc::new(vars),
            params: Arc::new(serde_json::Map::new()),
            execution: Arc::new(ExecutionMeta {
                id: "exec-1".to_string(),
                workflow_id: "wf-1".to_string(),
                mode: ExecutionMode::Manual,
            }),
            run_index: 0,
        }
    }

    #[test]
    fn literal_string_passes_through() {
        let ctx = ctx(vec![json!({"a": 1})]);
        let v = resolve_string("plain text", &ctx.item(0)).unwrap();
        assert_eq!(v, json!("plain text"));
    }

    #[test]
    fn whole_string_expression_yields_raw_value() {
        let ctx = ctx(vec![json!({"score": 42})]);
        let v = resolve_string("{{ $json.score }}", &ctx.item(0)).unwrap();
        assert_eq!(v, json!(42));
    }

    #[test]
    fn embedded_expression_stringifies() {
        let ctx = ctx(vec![json!({"name": "ada"})]);
        let v = resolve_string("hello {{ $json.name }}!", &ctx.item(0)).unwrap();
        assert_eq!(v, json!("hello ada!"));
    }

    #[test]
    fn node_accessor_reads_upstream_output() {
        let ctx = ctx(vec![json!({})]);
        assert_eq!(evaluate("$node.fetch.total", &ctx.item(0)).unwrap(), json!(7));
        assert_eq!(
            evaluate("$node.fetch", &ctx.item(0)).unwrap(),
            json!([{"total": 7}])
        );
    }

    #[test]
    fn vars_and_index_accessors_resolve() {
        let ctx = ctx(vec![json!({}), json!({})]);
        assert_eq!(evaluate("$vars.region", &ctx.item(1)).unwrap(), json!("eu-west"));
        assert_eq!(evaluate("$itemIndex", &ctx.item(1)).unwrap(), json!(1));
    }

    #[test]
    fn unknown_accessor_is_a_typed_error() {
        let ctx = ctx(vec![json!({})]);
        let err = evaluate("$bogus.field", &ctx.item(0)).unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
    }

    #[test]
    fn lua_tier_rewrites_accessor_tokens() {
        let ctx = ctx(vec![json!({"score": 21})]);
        assert_eq!(
            evaluate("$json.score * 2 > 40", &ctx.item(0)).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn lua_tier_computes_over_item() {
        let ctx = ctx(vec![json!({"score": 21})]);
        let v = evaluate("item.score * 2", &ctx.item(0)).unwrap();
        assert_eq!(v, json!(42));
    }

    #[test]
    fn evaluation_never_mutates_context() {
        let ctx = ctx(vec![json!({"score": 21})]);
        let _ = evaluate("item.score * 2", &ctx.item(0)).unwrap();
        assert_eq!(ctx.items[0], json!({"score": 21}));
    }
}
