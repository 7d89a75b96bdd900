//! Bounded-concurrency scatter execution and result gathering.
//!
//! Items fan out with at most `max_concurrency` in flight; one item's
//! failure never aborts its siblings, and every item produces a tagged
//! `ItemOutcome` before the step completes. Gathering folds the outcomes
//! back via collect, merge, or reduce.

use std::future::Future;

use futures_util::StreamExt;
use serde_json::{Value, json};

use trellis_types::execution::ItemOutcome;
use trellis_types::workflow::GatherStrategy;

use crate::expression::{Scope, resolve};

use super::eval::EvalError;

/// Run one future per item with at most `max_concurrency` in flight.
///
/// Results come back in item order regardless of completion order, so
/// downstream gathering is deterministic.
pub async fn run_items<F, Fut>(
    items: Vec<Value>,
    max_concurrency: usize,
    run_item: F,
) -> Vec<ItemOutcome>
where
    F: Fn(usize, Value) -> Fut,
    Fut: Future<Output = Result<Value, String>>,
{
    futures_util::stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let fut = run_item(index, item);
        async move {
            match fut.await {
                Ok(output) => ItemOutcome {
                    index,
                    success: true,
                    output: Some(output),
                    error: None,
                },
                Err(error) => ItemOutcome {
                    index,
                    success: false,
                    output: None,
                    error: Some(error),
                },
            }
        }
    }))
    .buffered(max_concurrency.max(1))
    .collect()
    .await
}

/// Fold gathered outcomes according to the gather strategy.
///
/// - `collect`: per-item result array (null for failed items)
/// - `merge`: shallow-merge of all successful object results
/// - `reduce`: resolve the configured expression against each successful
///   item result and fold: numbers sum, strings concatenate, arrays chain
pub fn gather_results(
    strategy: GatherStrategy,
    expression: Option<&str>,
    outcomes: &[ItemOutcome],
    scope: &Scope,
) -> Result<Value, EvalError> {
    match strategy {
        GatherStrategy::Collect => Ok(Value::Array(
            outcomes
                .iter()
                .map(|o| o.output.clone().unwrap_or(Value::Null))
                .collect(),
        )),
        GatherStrategy::Merge => {
            let mut merged = serde_json::Map::new();
            for outcome in outcomes {
                if let Some(Value::Object(map)) = &outcome.output {
                    for (k, v) in map {
                        merged.insert(k.clone(), v.clone());
                    }
                }
            }
            Ok(Value::Object(merged))
        }
        GatherStrategy::Reduce => {
            let expression = expression.ok_or_else(|| {
                EvalError::BadConfig("gather strategy 'reduce' requires an expression".to_string())
            })?;
            let mut accumulator: Option<Value> = None;
            for outcome in outcomes {
                let Some(output) = &outcome.output else {
                    continue;
                };
                let child = scope.child_with_loop(output.clone(), outcome.index);
                let value = resolve(expression, &child)?;
                accumulator = Some(match accumulator {
                    None => value,
                    Some(acc) => fold_pair(acc, value)?,
                });
            }
            Ok(accumulator.unwrap_or(Value::Null))
        }
    }
}

fn fold_pair(acc: Value, next: Value) -> Result<Value, EvalError> {
    match (&acc, &next) {
        (Value::Number(_), Value::Number(_)) => {
            let sum = acc.as_f64().unwrap_or(0.0) + next.as_f64().unwrap_or(0.0);
            Ok(json!(sum))
        }
        (Value::String(a), Value::String(b)) => Ok(json!(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        _ => Err(EvalError::BadConfig(format!(
            "reduce cannot fold {} with {}",
            type_label(&acc),
            type_label(&next)
        ))),
    }
}

fn type_label(value: &Value) -> &'static str {
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
// Tests
// ---------------------------------------------------------------------------
