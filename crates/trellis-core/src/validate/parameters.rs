//! Gate 2: parameter validation of the completed design.
//!
//! Runs after Stage 2. Checks per-kind field shape, the
//! `next`/`executeIf` exclusivity rules, required action parameters
//! against the catalogue, and that every reference resolves: inputs to
//! declared `RequiredInput`s, step references to existing non-downstream
//! steps, loop references to an enclosing body. Gate 2 failures are the
//! only repairable failures; `validate_single_step` re-checks one repaired
//! step in isolation.

use std::collections::HashSet;

use serde_json::Value;

use trellis_types::catalog::ActionCatalog;
use trellis_types::condition::Condition;
use trellis_types::workflow::{GateError, GateReport, StepKind, WorkflowDesign, WorkflowStep};

use crate::expression::{ExpressionError, Reference, parse_template};
use crate::graph::{WorkflowGraph, validate_nested};
use crate::synthesis::walk::{for_each_step, visit_strings};

use super::{KNOWN_TRANSFORM_OPS, branch_target_ids, collect_ids, placeholder_tokens};

/// Run Gate 2 over a completed design.
pub fn validate(design: &WorkflowDesign, catalog: &ActionCatalog) -> GateReport {
    let mut report = GateReport::new();

    // Structural re-validation: the same acyclicity/reachability checks as
    // Gate 1, since repair and completion may have touched the tree.
    let graph = match WorkflowGraph::build(&design.steps) {
        Ok(graph) => Some(graph),
        Err(e) => {
            report.push_error(e.to_string());
            None
        }
    };
    if let Err(e) = validate_nested(&design.steps) {
        report.push_error(e.to_string());
    }

    let (known_ids, _) = collect_ids(&design.steps);
    let declared: HashSet<String> = design
        .required_inputs
        .iter()
        .map(|i| i.name.clone())
        .collect();
    let branch_targets = branch_target_ids(&design.steps);
    let top_level: HashSet<&str> = design.steps.iter().map(|s| s.id.as_str()).collect();

    for token in placeholder_tokens(design) {
        report.push_error(format!("Placeholder token '{token}' must be resolved"));
    }

    for_each_step(&design.steps, &mut |step, depth| {
        // Ambiguous-successor rules are hard errors.
        if step.next.is_some() && step.execute_if.is_some() {
            report.push_step_error(
                &step.id,
                "Carries both 'next' and 'executeIf', creating an ambiguous successor",
            );
        }
        if branch_targets.contains(&step.id) && step.execute_if.is_some() {
            report.push_step_error(
                &step.id,
                "Is a trueBranch/falseBranch target and must not carry 'executeIf'",
            );
        }

        for error in shape_errors(step, catalog) {
            report.push_step_error(&step.id, error);
        }
        for warning in shape_warnings(step) {
            report.push_warning(format!("Step {}: {warning}", step.id));
        }

        let in_loop_body = depth > 0;
        for error in reference_errors(step, &known_ids, &declared, in_loop_body) {
            report.push_step_error(&step.id, error);
        }

        // Forward references: a top-level step must not read from a step
        // strictly downstream of it.
        if let Some(graph) = &graph {
            if top_level.contains(step.id.as_str()) {
                for target in referenced_step_ids(step) {
                    if top_level.contains(target.as_str())
                        && graph.is_downstream(&step.id, &target)
                    {
                        report.push_step_error(
                            &step.id,
                            format!("References step '{target}' which runs after this step"),
                        );
                    }
                }
            }
        }
    });

    for warning in anti_pattern_warnings(design) {
        report.push_warning(warning);
    }

    report
}

/// Re-validate one repaired step in isolation: shape, required fields,
/// and reference existence, scoped to that step.
pub fn validate_single_step(
    step: &WorkflowStep,
    catalog: &ActionCatalog,
    known_ids: &HashSet<String>,
    declared_inputs: &HashSet<String>,
) -> Vec<GateError> {
    let mut errors: Vec<GateError> = shape_errors(step, catalog)
        .into_iter()
        .map(|message| GateError {
            step_id: Some(step.id.clone()),
            message,
        })
        .collect();
    // Repaired steps may legitimately sit inside loop bodies, so loop
    // references are allowed here; the full Gate 2 re-run re-checks them
    // in context.
    errors.extend(
        reference_errors(step, known_ids, declared_inputs, true)
            .into_iter()
            .map(|message| GateError {
                step_id: Some(step.id.clone()),
                message,
            }),
    );
    errors
}

// ---------------------------------------------------------------------------
// Per-kind shape checks
// ---------------------------------------------------------------------------

fn shape_errors(step: &WorkflowStep, catalog: &ActionCatalog) -> Vec<String> {
    let mut errors = Vec::new();
    match &step.kind {
        StepKind::Action {
            plugin,
            action,
            params,
        } => {
            if !catalog.has_action(plugin, action) {
                errors.push(format!("Unknown action '{plugin}.{action}'"));
            }
            match params {
                Value::Object(map) => {
                    if let Some(spec) = catalog.action_spec(plugin, action) {
                        for required in &spec.required_params {
                            if !map.contains_key(required) {
                                errors.push(format!("Missing required parameter '{required}'"));
                            }
                        }
                    }
                }
                _ => errors.push("Action step is missing 'params'".to_string()),
            }
        }
        StepKind::AiProcessing { prompt, .. } => {
            if prompt.trim().is_empty() {
                errors.push("AI step has an empty prompt".to_string());
            }
        }
        StepKind::Conditional { condition, .. } => {
            errors.extend(condition_type_errors(condition));
        }
        StepKind::Loop {
            iterate_over,
            loop_steps,
            max_iterations,
        } => {
            if iterate_over.trim().is_empty() {
                errors.push("Loop step is missing 'iterateOver'".to_string());
            }
            if loop_steps.is_empty() {
                errors.push("Loop step has no 'loopSteps'".to_string());
            }
            if *max_iterations == Some(0) {
                errors.push("'maxIterations' must be at least 1".to_string());
            }
        }
        StepKind::ScatterGather {
            scatter,
            gather,
            max_concurrency,
        } => {
            if scatter.input.trim().is_empty() {
                errors.push("Scatter step is missing its input collection".to_string());
            }
            if scatter.steps.is_empty() {
                errors.push("Scatter step has no sub-steps".to_string());
            }
            if let Some(c) = max_concurrency {
                if !(1..=10).contains(c) {
                    errors.push(format!("'maxConcurrency' must be between 1 and 10, got {c}"));
                }
            }
            if gather.strategy == trellis_types::workflow::GatherStrategy::Reduce
                && gather.expression.is_none()
            {
                errors.push("Gather strategy 'reduce' requires an expression".to_string());
            }
        }
        StepKind::Transform { input, .. } | StepKind::Validation { input, .. } => {
            if input.trim().is_empty() {
                errors.push("Missing 'input'".to_string());
            }
        }
        StepKind::Comparison {
            operation,
            input,
            config,
        } => {
            if input.trim().is_empty() {
                errors.push("Missing 'input'".to_string());
            }
            if let Some(value) = config.get("value") {
                if !has_template(value) && !operation.compatible_with(value) {
                    errors.push(format!(
                        "Operator '{}' is not applicable to a {} value",
                        operation.as_str(),
                        value_type_name(value)
                    ));
                }
            }
        }
        StepKind::Switch { cases, default, .. } => {
            if cases.is_empty() && default.is_none() {
                errors.push("Switch step has no cases and no default".to_string());
            }
        }
        StepKind::SubWorkflow { workflow, .. } => {
            if workflow.trim().is_empty() {
                errors.push("Sub-workflow step names no workflow".to_string());
            }
        }
        StepKind::Delay { .. } | StepKind::HumanApproval { .. } => {}
    }

    if let Some(guard) = &step.execute_if {
        errors.extend(condition_type_errors(guard));
    }

    errors
}

fn shape_warnings(step: &WorkflowStep) -> Vec<String> {
    let mut warnings = Vec::new();
    match &step.kind {
        StepKind::Loop { max_iterations, .. } => {
            if max_iterations.is_none() {
                warnings.push("Loop step has no 'maxIterations' safety bound".to_string());
            }
        }
        StepKind::Transform { operation, .. } => {
            if !KNOWN_TRANSFORM_OPS.contains(&operation.as_str()) {
                warnings.push(format!("Unknown transform operation '{operation}'"));
            }
        }
        StepKind::Validation { rules, .. } => {
            if rules.is_empty() {
                warnings.push("Validation step has no rules".to_string());
            }
        }
        StepKind::Delay { duration_ms } => {
            if *duration_ms == 0 {
                warnings.push("Delay of 0ms has no effect".to_string());
            }
        }
        _ => {}
    }
    warnings
}

/// Type-directed operator checks over literal condition operands.
/// Operands that are themselves templates are typed at runtime instead.
fn condition_type_errors(condition: &Condition) -> Vec<String> {
    let mut errors = Vec::new();
    for leaf in condition.leaves() {
        if let Condition::Simple {
            operator, value, ..
        } = leaf
        {
            if !has_template(value) && !operator.compatible_with(value) {
                errors.push(format!(
                    "Operator '{}' is not applicable to a {} value",
                    operator.as_str(),
                    value_type_name(value)
                ));
            }
        }
    }
    errors
}

fn has_template(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.contains("{{"))
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "numeric",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

// ---------------------------------------------------------------------------
// Reference checks
// ---------------------------------------------------------------------------

fn reference_errors(
    step: &WorkflowStep,
    known_ids: &HashSet<String>,
    declared_inputs: &HashSet<String>,
    in_loop_body: bool,
) -> Vec<String> {
    let mut errors = Vec::new();
    let allow_loop_refs = in_loop_body || has_own_body(step);
    visit_strings(step, &mut |text| {
        match parse_template(text) {
            Ok(refs) => {
                for parsed in refs {
                    match &parsed.reference {
                        Reference::Input { name } => {
                            if !declared_inputs.contains(name) {
                                errors.push(format!(
                                    "References undeclared input '{name}'"
                                ));
                            }
                        }
                        Reference::Step { step_id, .. } => {
                            if !known_ids.contains(step_id) {
                                errors.push(format!("References unknown step '{step_id}'"));
                            }
                        }
                        Reference::LoopItem { .. } | Reference::LoopIndex => {
                            if !allow_loop_refs {
                                errors.push(format!(
                                    "Loop reference '{{{{{}}}}}' used outside a loop body",
                                    parsed.raw
                                ));
                            }
                        }
                    }
                }
            }
            Err(ExpressionError::DynamicIndex { reference }) => {
                errors.push(format!(
                    "Dynamic index in '{reference}'; only literal indices are supported"
                ));
            }
            Err(e) => errors.push(e.to_string()),
        }
    });
    errors
}

/// Steps that own a body may legitimately mention `loop.item` in their own
/// fields (a loop's `iterateOver` cannot, but its gather expression can).
fn has_own_body(step: &WorkflowStep) -> bool {
    matches!(
        step.kind,
        StepKind::ScatterGather { .. } | StepKind::Loop { .. }
    )
}

/// Step ids referenced from this step's template strings.
fn referenced_step_ids(step: &WorkflowStep) -> Vec<String> {
    let mut ids = Vec::new();
    visit_strings(step, &mut |text| {
        if let Ok(refs) = parse_template(text) {
            for parsed in refs {
                if let Reference::Step { step_id, .. } = parsed.reference {
                    ids.push(step_id);
                }
            }
        }
    });
    ids
}

// ---------------------------------------------------------------------------
// Known anti-patterns
// ---------------------------------------------------------------------------

/// Targeted warnings for shapes that validate but usually misbehave, e.g.
/// a map-transform feeding a spreadsheet-append action without a
/// `columns` config.
fn anti_pattern_warnings(design: &WorkflowDesign) -> Vec<String> {
    let mut map_transform_ids = HashSet::new();
    for_each_step(&design.steps, &mut |step, _| {
        if let StepKind::Transform { operation, .. } = &step.kind {
            if operation == "map" {
                map_transform_ids.insert(step.id.clone());
            }
        }
    });
    if map_transform_ids.is_empty() {
        return Vec::new();
    }

    let mut warnings = Vec::new();
    for_each_step(&design.steps, &mut |step, _| {
        let StepKind::Action {
            plugin,
            action,
            params,
        } = &step.kind
        else {
            return;
        };
        let appends = action.contains("append") || action.contains("add_row");
        let Value::Object(map) = params else { return };
        if !appends || map.contains_key("columns") {
            return;
        }
        for target in referenced_step_ids(step) {
            if map_transform_ids.contains(&target) {
                warnings.push(format!(
                    "Step {}: map-transform '{target}' feeds '{plugin}.{action}' without a 'columns' config",
                    step.id
                ));
            }
        }
    });
    warnings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
