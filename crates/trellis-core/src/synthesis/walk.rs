//! Step-tree traversal helpers shared by Stage 2 and the validation gates.
//!
//! `for_each_step` / `for_each_step_mut` visit steps recursively through
//! loop and scatter bodies. `visit_strings` / `visit_strings_mut` expose
//! every template-bearing string of a single step (params values, prompts,
//! condition fields, transform inputs) without descending into nested
//! bodies -- callers combine the two.

use serde_json::Value;

use trellis_types::condition::Condition;
use trellis_types::workflow::{StepKind, WorkflowStep};

/// Visit every step, depth-first, including nested loop/scatter bodies.
/// The callback receives the step and its nesting depth (0 = top level).
pub fn for_each_step<'a>(steps: &'a [WorkflowStep], f: &mut impl FnMut(&'a WorkflowStep, usize)) {
    fn walk<'a>(
        steps: &'a [WorkflowStep],
        depth: usize,
        f: &mut impl FnMut(&'a WorkflowStep, usize),
    ) {
        for step in steps {
            f(step, depth);
            match &step.kind {
                StepKind::Loop { loop_steps, .. } => walk(loop_steps, depth + 1, f),
                StepKind::ScatterGather { scatter, .. } => walk(&scatter.steps, depth + 1, f),
                _ => {}
            }
        }
    }
    walk(steps, 0, f);
}

/// Mutable variant of [`for_each_step`].
pub fn for_each_step_mut(steps: &mut [WorkflowStep], f: &mut impl FnMut(&mut WorkflowStep, usize)) {
    fn walk(steps: &mut [WorkflowStep], depth: usize, f: &mut impl FnMut(&mut WorkflowStep, usize)) {
        for step in steps {
            f(step, depth);
            match &mut step.kind {
                StepKind::Loop { loop_steps, .. } => walk(loop_steps, depth + 1, f),
                StepKind::ScatterGather { scatter, .. } => walk(&mut scatter.steps, depth + 1, f),
                _ => {}
            }
        }
    }
    walk(steps, 0, f);
}

/// Visit every template-bearing string of one step (not its nested
/// bodies).
pub fn visit_strings(step: &WorkflowStep, f: &mut impl FnMut(&str)) {
    if let Some(cond) = &step.execute_if {
        visit_condition(cond, f);
    }
    match &step.kind {
        StepKind::Action { params, .. } => visit_value(params, f),
        StepKind::AiProcessing { prompt, input, .. } => {
            f(prompt);
            if let Some(input) = input {
                f(input);
            }
        }
        StepKind::Conditional { condition, .. } => visit_condition(condition, f),
        StepKind::Loop { iterate_over, .. } => f(iterate_over),
        StepKind::ScatterGather { scatter, gather, .. } => {
            f(&scatter.input);
            if let Some(expr) = &gather.expression {
                f(expr);
            }
        }
        StepKind::Transform { input, config, .. } => {
            f(input);
            visit_value(config, f);
        }
        StepKind::Comparison { input, config, .. } => {
            f(input);
            visit_value(config, f);
        }
        StepKind::Validation { input, .. } => f(input),
        StepKind::Switch { input, .. } => f(input),
        StepKind::HumanApproval { prompt, .. } => f(prompt),
        StepKind::SubWorkflow { inputs, .. } => {
            if let Some(inputs) = inputs {
                visit_value(inputs, f);
            }
        }
        StepKind::Delay { .. } => {}
    }
}

/// Mutable variant of [`visit_strings`].
pub fn visit_strings_mut(step: &mut WorkflowStep, f: &mut impl FnMut(&mut String)) {
    if let Some(cond) = &mut step.execute_if {
        visit_condition_mut(cond, f);
    }
    match &mut step.kind {
        StepKind::Action { params, .. } => visit_value_mut(params, f),
        StepKind::AiProcessing { prompt, input, .. } => {
            f(prompt);
            if let Some(input) = input {
                f(input);
            }
        }
        StepKind::Conditional { condition, .. } => visit_condition_mut(condition, f),
        StepKind::Loop { iterate_over, .. } => f(iterate_over),
        StepKind::ScatterGather { scatter, gather, .. } => {
            f(&mut scatter.input);
            if let Some(expr) = &mut gather.expression {
                f(expr);
            }
        }
        StepKind::Transform { input, config, .. } => {
            f(input);
            visit_value_mut(config, f);
        }
        StepKind::Comparison { input, config, .. } => {
            f(input);
            visit_value_mut(config, f);
        }
        StepKind::Validation { input, .. } => f(input),
        StepKind::Switch { input, .. } => f(input),
        StepKind::HumanApproval { prompt, .. } => f(prompt),
        StepKind::SubWorkflow { inputs, .. } => {
            if let Some(inputs) = inputs {
                visit_value_mut(inputs, f);
            }
        }
        StepKind::Delay { .. } => {}
    }
}

fn visit_value(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => {
            for item in items {
                visit_value(item, f);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                visit_value(v, f);
            }
        }
        _ => {}
    }
}

fn visit_value_mut(value: &mut Value, f: &mut impl FnMut(&mut String)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => {
            for item in items {
                visit_value_mut(item, f);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                visit_value_mut(v, f);
            }
        }
        _ => {}
    }
}

fn visit_condition(cond: &Condition, f: &mut impl FnMut(&str)) {
    match cond {
        Condition::Simple { field, value, .. } => {
            f(field);
            visit_value(value, f);
        }
        Condition::ComplexAnd { conditions } | Condition::ComplexOr { conditions } => {
            for c in conditions {
                visit_condition(c, f);
            }
        }
        Condition::ComplexNot { condition } => visit_condition(condition, f),
    }
}

fn visit_condition_mut(cond: &mut Condition, f: &mut impl FnMut(&mut String)) {
    match cond {
        Condition::Simple { field, value, .. } => {
            f(field);
            visit_value_mut(value, f);
        }
        Condition::ComplexAnd { conditions } | Condition::ComplexOr { conditions } => {
            for c in conditions {
                visit_condition_mut(c, f);
            }
        }
        Condition::ComplexNot { condition } => visit_condition_mut(condition, f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_types::condition::ConditionOperator;
    use trellis_types::workflow::{ScatterSpec, GatherSpec, GatherStrategy};

    fn action(id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Action {
                plugin: "p".to_string(),
                action: "a".to_string(),
                params: json!({"q": "{{input.query}}", "nested": {"x": "{{step1.data.y}}"}}),
            },
        }
    }

    #[test]
    fn test_for_each_step_recurses_into_bodies() {
        let steps = vec![WorkflowStep {
            id: "outer".to_string(),
            name: "outer".to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Loop {
                iterate_over: "{{step0.data.items}}".to_string(),
                loop_steps: vec![WorkflowStep {
                    id: "mid".to_string(),
                    name: "mid".to_string(),
                    next: None,
                    on_success: None,
                    on_failure: None,
                    execute_if: None,
                    kind: StepKind::ScatterGather {
                        scatter: ScatterSpec {
                            input: "{{loop.item.parts}}".to_string(),
                            steps: vec![action("inner")],
                        },
                        gather: GatherSpec {
                            strategy: GatherStrategy::Collect,
                            expression: None,
                        },
                        max_concurrency: None,
                    },
                }],
                max_iterations: Some(5),
            },
        }];
        let mut seen = Vec::new();
        for_each_step(&steps, &mut |step, depth| seen.push((step.id.clone(), depth)));
        assert_eq!(
            seen,
            vec![
                ("outer".to_string(), 0),
                ("mid".to_string(), 1),
                ("inner".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_visit_strings_covers_nested_param_values() {
        let step = action("s");
        let mut seen = Vec::new();
        visit_strings(&step, &mut |s| seen.push(s.to_string()));
        assert!(seen.contains(&"{{input.query}}".to_string()));
        assert!(seen.contains(&"{{step1.data.y}}".to_string()));
    }

    #[test]
    fn test_visit_strings_covers_guard_condition() {
        let mut step = action("s");
        step.execute_if = Some(Condition::Simple {
            field: "{{step1.data.flag}}".to_string(),
            operator: ConditionOperator::Eq,
            value: json!("{{input.expected}}"),
        });
        let mut seen = Vec::new();
        visit_strings(&step, &mut |s| seen.push(s.to_string()));
        assert!(seen.contains(&"{{step1.data.flag}}".to_string()));
        assert!(seen.contains(&"{{input.expected}}".to_string()));
    }

    #[test]
    fn test_visit_strings_mut_rewrites_in_place() {
        let mut step = action("s");
        visit_strings_mut(&mut step, &mut |s| {
            *s = s.replace("{{input.query}}", "{{input.search_query}}");
        });
        let StepKind::Action { params, .. } = &step.kind else {
            panic!("expected action");
        };
        assert_eq!(params["q"], "{{input.search_query}}");
    }
}
