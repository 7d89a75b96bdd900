//! Condition and transform evaluation for the interpreter.
//!
//! Conditions resolve their `field` template against the run scope and
//! apply the operator with type direction: a numeric comparator over a
//! non-numeric value is a typed evaluation error, never a silent
//! coercion. Transforms implement the closed operation set Gate 2 knows
//! about.

use serde_json::{Value, json};

use trellis_types::condition::{Condition, ConditionOperator};

use crate::expression::{ExpressionError, Scope, resolve, stringify};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from condition or transform evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("operator '{operator}' is not applicable to {left} and {right}")]
    TypeMismatch {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("transform config error: {0}")]
    BadConfig(String),

    #[error("transform input error: {0}")]
    BadInput(String),
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Evaluate a condition tree against the scope.
pub fn evaluate_condition(condition: &Condition, scope: &Scope) -> Result<bool, EvalError> {
    match condition {
        Condition::Simple {
            field,
            operator,
            value,
        } => {
            let left = resolve(field, scope)?;
            let right = if matches!(value, Value::String(s) if s.contains("{{")) {
                resolve(value.as_str().unwrap_or_default(), scope)?
            } else {
                value.clone()
            };
            compare(*operator, &left, &right)
        }
        Condition::ComplexAnd { conditions } => {
            for c in conditions {
                if !evaluate_condition(c, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::ComplexOr { conditions } => {
            for c in conditions {
                if evaluate_condition(c, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::ComplexNot { condition } => Ok(!evaluate_condition(condition, scope)?),
    }
}

/// Apply one comparison operator to two resolved values.
pub fn compare(
    operator: ConditionOperator,
    left: &Value,
    right: &Value,
) -> Result<bool, EvalError> {
    use ConditionOperator::*;

    let mismatch = || EvalError::TypeMismatch {
        operator: operator.as_str(),
        left: type_name(left),
        right: type_name(right),
    };

    match operator {
        Eq => Ok(loose_eq(left, right)),
        Ne => Ok(!loose_eq(left, right)),
        Gt | Ge | Lt | Le => {
            let (l, r) = (
                left.as_f64().ok_or_else(mismatch)?,
                right.as_f64().ok_or_else(mismatch)?,
            );
            Ok(match operator {
                Gt => l > r,
                Ge => l >= r,
                Lt => l < r,
                Le => l <= r,
                _ => unreachable!(),
            })
        }
        Contains => match (left, right) {
            (Value::String(l), Value::String(r)) => Ok(l.contains(r.as_str())),
            (Value::Array(items), r) => Ok(items.iter().any(|i| loose_eq(i, r))),
            _ => Err(mismatch()),
        },
        StartsWith => match (left, right) {
            (Value::String(l), Value::String(r)) => Ok(l.starts_with(r.as_str())),
            _ => Err(mismatch()),
        },
        EndsWith => match (left, right) {
            (Value::String(l), Value::String(r)) => Ok(l.ends_with(r.as_str())),
            _ => Err(mismatch()),
        },
        Includes => match left {
            Value::Array(items) => Ok(items.iter().any(|i| loose_eq(i, right))),
            _ => Err(mismatch()),
        },
        In => match right {
            Value::Array(items) => Ok(items.iter().any(|i| loose_eq(i, left))),
            Value::String(r) => match left {
                Value::String(l) => Ok(r.contains(l.as_str())),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}

/// Equality with numeric widening (`1 == 1.0`), strict otherwise.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Apply a transform operation to a resolved input value.
pub fn apply_transform(
    operation: &str,
    input: Value,
    config: &Value,
    scope: &Scope,
) -> Result<Value, EvalError> {
    match operation {
        "extract" => {
            let path = config_str(config, "path")?;
            let mut current = input;
            for seg in path.split('.').filter(|s| !s.is_empty()) {
                current = current
                    .get(seg)
                    .cloned()
                    .ok_or_else(|| EvalError::BadInput(format!("path '{path}' not found")))?;
            }
            Ok(current)
        }
        "map" => {
            let items = as_array(&input)?;
            if let Some(field) = config.get("field").and_then(Value::as_str) {
                Ok(Value::Array(
                    items
                        .iter()
                        .map(|item| item.get(field).cloned().unwrap_or(Value::Null))
                        .collect(),
                ))
            } else if let Some(template) = config.get("template").and_then(Value::as_str) {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let child = scope.child_with_loop(item.clone(), index);
                    out.push(resolve(template, &child)?);
                }
                Ok(Value::Array(out))
            } else {
                Err(EvalError::BadConfig(
                    "map requires a 'field' or 'template' config".to_string(),
                ))
            }
        }
        "filter" => {
            let items = as_array(&input)?;
            let condition: Condition = serde_json::from_value(
                config
                    .get("condition")
                    .cloned()
                    .ok_or_else(|| EvalError::BadConfig("filter requires a 'condition'".to_string()))?,
            )
            .map_err(|e| EvalError::BadConfig(format!("invalid filter condition: {e}")))?;
            let mut out = Vec::new();
            for (index, item) in items.iter().enumerate() {
                let child = scope.child_with_loop(item.clone(), index);
                if evaluate_condition(&condition, &child)? {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        "count" => {
            let count = match &input {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.len(),
                _ => return Err(EvalError::BadInput("count needs a collection".to_string())),
            };
            Ok(json!(count))
        }
        "join" => {
            let items = as_array(&input)?;
            let separator = config
                .get("separator")
                .and_then(Value::as_str)
                .unwrap_or(", ");
            Ok(json!(
                items.iter().map(stringify).collect::<Vec<_>>().join(separator)
            ))
        }
        "limit" => {
            let items = as_array(&input)?;
            let count = config
                .get("count")
                .and_then(Value::as_u64)
                .ok_or_else(|| EvalError::BadConfig("limit requires a 'count'".to_string()))?
                as usize;
            Ok(Value::Array(items.iter().take(count).cloned().collect()))
        }
        "sort" => {
            let mut items = as_array(&input)?.to_vec();
            let field = config.get("field").and_then(Value::as_str);
            let descending = config.get("order").and_then(Value::as_str) == Some("desc");
            items.sort_by(|a, b| {
                let (a, b) = match field {
                    Some(f) => (a.get(f), b.get(f)),
                    None => (Some(a), Some(b)),
                };
                compare_for_sort(a, b)
            });
            if descending {
                items.reverse();
            }
            Ok(Value::Array(items))
        }
        "flatten" => {
            let items = as_array(&input)?;
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        "merge" => {
            let items = as_array(&input)?;
            let mut merged = serde_json::Map::new();
            for item in items {
                if let Value::Object(map) = item {
                    for (k, v) in map {
                        merged.insert(k.clone(), v.clone());
                    }
                }
            }
            Ok(Value::Object(merged))
        }
        other => Err(EvalError::BadConfig(format!(
            "unknown transform operation '{other}'"
        ))),
    }
}

fn as_array(input: &Value) -> Result<&Vec<Value>, EvalError> {
    input
        .as_array()
        .ok_or_else(|| EvalError::BadInput("expected an array input".to_string()))
}

fn config_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, EvalError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::BadConfig(format!("missing '{key}' config")))
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => stringify(a).cmp(&stringify(b)),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        let mut s = Scope::new();
        s.set_input("threshold", json!(5));
        s.set_step_output(
            "step1",
            json!({"data": {"count": 7, "tag": "urgent", "flags": ["a", "b"]}}),
        );
        s
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    #[test]
    fn test_numeric_comparison() {
        let cond = Condition::Simple {
            field: "{{step1.data.count}}".to_string(),
            operator: ConditionOperator::Gt,
            value: json!(5),
        };
        assert!(evaluate_condition(&cond, &scope()).unwrap());
    }

    #[test]
    fn test_template_operand_resolves() {
        let cond = Condition::Simple {
            field: "{{step1.data.count}}".to_string(),
            operator: ConditionOperator::Gt,
            value: json!("{{input.threshold}}"),
        };
        assert!(evaluate_condition(&cond, &scope()).unwrap());
    }

    #[test]
    fn test_string_operators() {
        let s = scope();
        for (op, value, expected) in [
            (ConditionOperator::Contains, json!("urg"), true),
            (ConditionOperator::StartsWith, json!("urg"), true),
            (ConditionOperator::EndsWith, json!("ent"), true),
            (ConditionOperator::Eq, json!("urgent"), true),
            (ConditionOperator::Ne, json!("calm"), true),
        ] {
            let cond = Condition::Simple {
                field: "{{step1.data.tag}}".to_string(),
                operator: op,
                value,
            };
            assert_eq!(evaluate_condition(&cond, &s).unwrap(), expected);
        }
    }

    #[test]
    fn test_numeric_operator_on_string_is_typed_error() {
        let cond = Condition::Simple {
            field: "{{step1.data.tag}}".to_string(),
            operator: ConditionOperator::Ge,
            value: json!(3),
        };
        let err = evaluate_condition(&cond, &scope()).unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn test_array_membership_operators() {
        let s = scope();
        let includes = Condition::Simple {
            field: "{{step1.data.flags}}".to_string(),
            operator: ConditionOperator::Includes,
            value: json!("a"),
        };
        assert!(evaluate_condition(&includes, &s).unwrap());

        let in_op = Condition::Simple {
            field: "{{step1.data.tag}}".to_string(),
            operator: ConditionOperator::In,
            value: json!(["urgent", "normal"]),
        };
        assert!(evaluate_condition(&in_op, &s).unwrap());
    }

    #[test]
    fn test_boolean_combinators() {
        let s = scope();
        let gt = Condition::Simple {
            field: "{{step1.data.count}}".to_string(),
            operator: ConditionOperator::Gt,
            value: json!(5),
        };
        let eq = Condition::Simple {
            field: "{{step1.data.tag}}".to_string(),
            operator: ConditionOperator::Eq,
            value: json!("calm"),
        };
        let and = Condition::ComplexAnd {
            conditions: vec![gt.clone(), eq.clone()],
        };
        assert!(!evaluate_condition(&and, &s).unwrap());
        let or = Condition::ComplexOr {
            conditions: vec![gt.clone(), eq.clone()],
        };
        assert!(evaluate_condition(&or, &s).unwrap());
        let not = Condition::ComplexNot {
            condition: Box::new(eq),
        };
        assert!(evaluate_condition(&not, &s).unwrap());
    }

    #[test]
    fn test_numeric_widening_equality() {
        assert!(compare(ConditionOperator::Eq, &json!(1), &json!(1.0)).unwrap());
        assert!(compare(ConditionOperator::Ne, &json!(1), &json!(2)).unwrap());
    }

    // -----------------------------------------------------------------------
    // Transforms
    // -----------------------------------------------------------------------

    #[test]
    fn test_transform_extract() {
        let out = apply_transform(
            "extract",
            json!({"a": {"b": 42}}),
            &json!({"path": "a.b"}),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, json!(42));
    }

    #[test]
    fn test_transform_map_field() {
        let out = apply_transform(
            "map",
            json!([{"subject": "Hi"}, {"subject": "Re"}]),
            &json!({"field": "subject"}),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, json!(["Hi", "Re"]));
    }

    #[test]
    fn test_transform_map_template() {
        let out = apply_transform(
            "map",
            json!([{"n": 1}, {"n": 2}]),
            &json!({"template": "item {{loop.index}}: {{loop.item.n}}"}),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, json!(["item 0: 1", "item 1: 2"]));
    }

    #[test]
    fn test_transform_filter() {
        let out = apply_transform(
            "filter",
            json!([{"n": 1}, {"n": 7}, {"n": 9}]),
            &json!({"condition": {
                "type": "simple",
                "field": "{{loop.item.n}}",
                "operator": ">",
                "value": 5
            }}),
            &scope(),
        )
        .unwrap();
        assert_eq!(out, json!([{"n": 7}, {"n": 9}]));
    }

    #[test]
    fn test_transform_count_join_limit() {
        let s = scope();
        assert_eq!(
            apply_transform("count", json!(["a", "b", "c"]), &json!({}), &s).unwrap(),
            json!(3)
        );
        assert_eq!(
            apply_transform(
                "join",
                json!(["a", "b"]),
                &json!({"separator": " | "}),
                &s
            )
            .unwrap(),
            json!("a | b")
        );
        assert_eq!(
            apply_transform("limit", json!([1, 2, 3, 4]), &json!({"count": 2}), &s).unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn test_transform_sort_flatten_merge() {
        let s = scope();
        assert_eq!(
            apply_transform(
                "sort",
                json!([{"n": 3}, {"n": 1}, {"n": 2}]),
                &json!({"field": "n", "order": "desc"}),
                &s
            )
            .unwrap(),
            json!([{"n": 3}, {"n": 2}, {"n": 1}])
        );
        assert_eq!(
            apply_transform("flatten", json!([[1, 2], [3], 4]), &json!({}), &s).unwrap(),
            json!([1, 2, 3, 4])
        );
        assert_eq!(
            apply_transform(
                "merge",
                json!([{"a": 1}, {"b": 2}, {"a": 3}]),
                &json!({}),
                &s
            )
            .unwrap(),
            json!({"a": 3, "b": 2})
        );
    }

    #[test]
    fn test_unknown_transform_errors() {
        let err = apply_transform("frobnicate", json!([]), &json!({}), &scope()).unwrap_err();
        assert!(matches!(err, EvalError::BadConfig(_)));
    }
}
