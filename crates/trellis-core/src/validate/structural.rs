//! Gate 1: structural validation of the Stage-1 design.
//!
//! Checks the shape the rest of the pipeline depends on: required
//! top-level fields, unique step ids, catalogued plugin/action references,
//! no placeholder tokens, edge-target existence, and acyclicity. Failures
//! here are fatal -- Stage 2 has not run, so nothing is repairable yet.

use trellis_types::catalog::ActionCatalog;
use trellis_types::workflow::{GateReport, StepKind, WorkflowDesign};

use crate::graph::{WorkflowGraph, validate_nested};
use crate::synthesis::walk::for_each_step;

use super::{collect_ids, non_snake_case_input_names, placeholder_tokens};

/// Run Gate 1 over a design.
pub fn validate(design: &WorkflowDesign, catalog: &ActionCatalog) -> GateReport {
    let mut report = GateReport::new();

    // Required top-level fields.
    if design.name.trim().is_empty() {
        report.push_error("Workflow name is missing");
    }
    if design.steps.is_empty() {
        report.push_error("Workflow has no steps");
    }
    if design.workflow_type.trim().is_empty() {
        report.push_warning("workflow_type is empty");
    }

    // Unique ids (including nested bodies) and non-empty ids.
    let (_, duplicates) = collect_ids(&design.steps);
    for id in duplicates {
        report.push_error(format!("Duplicate step id '{id}'"));
    }
    for_each_step(&design.steps, &mut |step, _| {
        if step.id.trim().is_empty() {
            report.push_error(format!("Step '{}' has an empty id", step.name));
        }
    });

    // Every action step must reference a catalogued plugin and action.
    for_each_step(&design.steps, &mut |step, _| {
        if let StepKind::Action { plugin, action, .. } = &step.kind {
            if !catalog.has_plugin(plugin) {
                report.push_step_error(&step.id, format!("Unknown plugin '{plugin}'"));
            } else if !catalog.has_action(plugin, action) {
                report.push_step_error(
                    &step.id,
                    format!("Unknown action '{action}' for plugin '{plugin}'"),
                );
            }
        }
    });

    // No bare $PLACEHOLDER tokens anywhere in the serialized tree.
    for token in placeholder_tokens(design) {
        report.push_error(format!(
            "Placeholder token '{token}' found; use {{{{input.name}}}} references instead"
        ));
    }

    // Input names should be snake_case (advisory).
    for name in non_snake_case_input_names(design) {
        report.push_warning(format!("Input name '{name}' is not snake_case"));
    }

    // Edge targets and acyclicity, top level and nested bodies.
    if let Err(e) = WorkflowGraph::build(&design.steps) {
        report.push_error(e.to_string());
    }
    if let Err(e) = validate_nested(&design.steps) {
        report.push_error(e.to_string());
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
