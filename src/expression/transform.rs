/// Array-level data transformation operations
///
/// Order-preserving filter, stable sort, merge strategies, 1-indexed
/// pagination, declared-type coercion and non-throwing validation.
/// These back the builtin node transforms and are usable standalone.

use crate::error::Result;
use crate::expression::context::ExecutionContext;
use crate::expression::eval::{evaluate, is_truthy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Strategy for combining multiple merge inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Index-wise shallow object merge; later inputs override keys and the
    /// result length equals the longest input
    Merge,
    /// Concatenation in declared input order
    Append,
    /// Cartesian object-merge across inputs
    Combine,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Keep items where the predicate expression is truthy, preserving order.
pub fn filter_data(items: &[Value], predicate: &str, ctx: &ExecutionContext) -> Result<Vec<Value>> {
    let mut kept = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let outcome = evaluate(predicate, &ctx.item(index))?;
        if is_truthy(&outcome) {
            kept.push(item.clone());
        }
    }
    Ok(kept)
}

/// Stable sort by a dotted field. Missing fields sort before present values
/// for ascending order.
pub fn sort_data(items: &[Value], field: &str, direction: SortDirection) -> Vec<Value> {
    let mut sorted: Vec<Value> = items.to_vec();
    sorted.sort_by(|a, b| {
        let ord = compare_fields(field_of(a, field), field_of(b, field));
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
    sorted
}

fn field_of<'a>(item: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = item;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Combine multiple named inputs (in declared order) per the strategy.
pub fn merge_input_data(inputs: &[(String, Vec<Value>)], strategy: MergeStrategy) -> Vec<Value> {
    match strategy {
        MergeStrategy::Append => inputs.iter().flat_map(|(_, items)| items.clone()).collect(),
        MergeStrategy::Merge => {
            let longest = inputs.iter().map(|(_, items)| items.len()).max().unwrap_or(0);
            (0..longest)
                .map(|i| {
                    let mut merged = Value::Object(serde_json::Map::new());
                    for (_, items) in inputs {
                        if let Some(item) = items.get(i) {
                            merged = shallow_merge(merged, item.clone());
                        }
                    }
                    merged
                })
                .collect()
        }
        MergeStrategy::Combine => {
            let mut combined = vec![Value::Object(serde_json::Map::new())];
            for (_, items) in inputs {
                if items.is_empty() {
                    continue;
                }
                combined = combined
                    .into_iter()
                    .flat_map(|base| {
                        items
                            .iter()
                            .map(move |item| shallow_merge(base.clone(), item.clone()))
                            .collect::<Vec<_>>()
                    })
                    .collect();
            }
            combined
        }
    }
}

/// Shallow object merge; a non-object right side replaces the left.
fn shallow_merge(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                a.insert(k, v);
            }
            Value::Object(a)
        }
        (_, right) => right,
    }
}

/// One page of items plus pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Value>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// 1-indexed pagination. Page and page size are clamped to at least 1.
pub fn paginate_data(items: &[Value], page: usize, page_size: usize) -> Page {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total = items.len();
    let total_pages = total.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);
    Page {
        items: items[start..end].to_vec(),
        page,
        page_size,
        total,
        total_pages,
        has_next: page < total_pages,
        has_prev: page > 1 && total > 0,
    }
}

/// Declared coercion targets for [`transform_data_types`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    String,
    Number,
    Boolean,
    Date,
    Json,
}

/// Coerce fields per declared target type.
///
/// Invalid numbers coerce to 0 and invalid dates to null; other invalid
/// coercions pass through unchanged.
pub fn transform_data_types(items: &[Value], rules: &[(String, TargetType)]) -> Vec<Value> {
    items
        .iter()
        .map(|item| {
            let mut item = item.clone();
            if let Value::Object(obj) = &mut item {
                for (field, target) in rules {
                    if let Some(value) = obj.get(field) {
                        let coerced = coerce(value, *target);
                        obj.insert(field.clone(), coerced);
                    }
                }
            }
            item
        })
        .collect()
}

fn coerce(value: &Value, target: TargetType) -> Value {
    match target {
        TargetType::String => match value {
            Value::String(_) => value.clone(),
            Value::Null => value.clone(),
            other => Value::String(stringify_scalar(other)),
        },
        TargetType::Number => match value {
            Value::Number(_) => value.clone(),
            Value::Bool(b) => Value::from(if *b { 1 } else { 0 }),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| s.trim().parse::<f64>().map(Value::from))
                .unwrap_or(Value::from(0)),
            _ => Value::from(0),
        },
        TargetType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::Number(n) => Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => value.clone(),
            },
            _ => value.clone(),
        },
        TargetType::Date => match value {
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::String(dt.to_rfc3339()))
                .or_else(|_| {
                    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                })
                .unwrap_or(Value::Null),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| Value::String(dt.to_rfc3339()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        TargetType::Json => match value {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
            other => other.clone(),
        },
    }
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One field rule for [`validate_data`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: Option<TargetType>,
}

/// A single data validation problem, tied to the item it was found in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIssue {
    pub item_index: usize,
    pub field: String,
    pub error: String,
}

/// Validate items against a field schema. Returns issues, never throws.
pub fn validate_data(items: &[Value], schema: &[FieldRule]) -> Vec<DataIssue> {
    let mut issues = Vec::new();
    for (item_index, item) in items.iter().enumerate() {
        for rule in schema {
            let value = item.get(&rule.field);
            match value {
                None | Some(Value::Null) => {
                    if rule.required {
                        issues.push(DataIssue {
                            item_index,
                            field: rule.field.clone(),
                            error: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    if let Some(kind) = rule.kind {
                        if !kind_matches(kind, value) {
                            issues.push(DataIssue {
                                item_index,
                                field: rule.field.clone(),
                                error: format!("expected {:?}", kind),
                            });
                        }
                    }
                }
            }
        }
    }
    issues
}

fn kind_matches(kind: TargetType, value: &Value) -> bool {
    match kind {
        TargetType::String => value.is_string(),
        TargetType::Number => value.is_number(),
        TargetType::Boolean => value.is_boolean(),
        TargetType::Date => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        TargetType::Json => value.is_object() || value.is_array(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_is_stable_and_missing_fields_come_first() {
        let items = vec![
            json!({"n": 2, "tag": "a"}),
            json!({"tag": "missing"}),
            json!({"n": 1}),
            json!({"n": 2, "tag": "b"}),
        ];
        let sorted = sort_data(&items, "n", SortDirection::Asc);
        assert_eq!(sorted[0], json!({"tag": "missing"}));
        assert_eq!(sorted[1], json!({"n": 1}));
        // Equal keys keep their original relative order.
        assert_eq!(sorted[2], json!({"n": 2, "tag": "a"}));
        assert_eq!(sorted[3], json!({"n": 2, "tag": "b"}));
    }

    #[test]
    fn append_preserves_declared_input_order() {
        let inputs = vec![
            ("x".to_string(), vec![json!(1), json!(2)]),
            ("y".to_string(), vec![json!(3)]),
        ];
        let merged = merge_input_data(&inputs, MergeStrategy::Append);
        assert_eq!(merged, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn merge_is_index_wise_with_later_inputs_overriding() {
        let inputs = vec![
            ("x".to_string(), vec![json!({"a": 1, "b": 1}), json!({"a": 2})]),
            ("y".to_string(), vec![json!({"b": 9})]),
        ];
        let merged = merge_input_data(&inputs, MergeStrategy::Merge);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], json!({"a": 1, "b": 9}));
        assert_eq!(merged[1], json!({"a": 2}));
    }

    #[test]
    fn combine_is_cartesian() {
        let inputs = vec![
            ("x".to_string(), vec![json!({"a": 1}), json!({"a": 2})]),
            ("y".to_string(), vec![json!({"b": 1}), json!({"b": 2})]),
        ];
        let merged = merge_input_data(&inputs, MergeStrategy::Combine);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0], json!({"a": 1, "b": 1}));
        assert_eq!(merged[3], json!({"a": 2, "b": 2}));
    }

    #[test]
    fn paginate_middle_page_of_125_items() {
        let items: Vec<Value> = (1..=125).map(Value::from).collect();
        let page = paginate_data(&items, 2, 50);
        assert_eq!(page.items.first(), Some(&json!(51)));
        assert_eq!(page.items.last(), Some(&json!(100)));
        assert_eq!(page.total, 125);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);
    }

    #[test]
    fn paginate_empty_input() {
        let page = paginate_data(&[], 1, 50);
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next);
        assert!(!page.has_prev);
    }

    #[test]
    fn invalid_number_coerces_to_zero_and_invalid_date_to_null() {
        let items = vec![json!({"n": "not-a-number", "d": "not-a-date", "b": "maybe"})];
        let rules = vec![
            ("n".to_string(), TargetType::Number),
            ("d".to_string(), TargetType::Date),
            ("b".to_string(), TargetType::Boolean),
        ];
        let out = transform_data_types(&items, &rules);
        assert_eq!(out[0]["n"], json!(0));
        assert_eq!(out[0]["d"], Value::Null);
        // Invalid boolean coercion passes through unchanged.
        assert_eq!(out[0]["b"], json!("maybe"));
    }

    #[test]
    fn validate_reports_item_index_and_field() {
        let items = vec![json!({"name": "ok", "age": 3}), json!({"age": "old"})];
        let schema = vec![
            FieldRule { field: "name".to_string(), required: true, kind: Some(TargetType::String) },
            FieldRule { field: "age".to_string(), required: false, kind: Some(TargetType::Number) },
        ];
        let issues = validate_data(&items, &schema);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].item_index, 1);
        assert_eq!(issues[0].field, "name");
        assert_eq!(issues[1].field, "age");
    }
}
