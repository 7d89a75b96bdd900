//! Gate 3: semantic review of the completed design.
//!
//! Advisory by design: confidence floor, unused suggested plugins,
//! missing loop bounds, and implicit terminal steps all warn without
//! blocking. Only missing or invalid core fields hard-fail.

use std::collections::HashSet;

use trellis_types::catalog::ActionCatalog;
use trellis_types::config::PipelineConfig;
use trellis_types::workflow::{GateReport, StepKind, WorkflowDesign};

use crate::synthesis::walk::for_each_step;

/// Run Gate 3 over a completed design.
pub fn validate(
    design: &WorkflowDesign,
    _catalog: &ActionCatalog,
    config: &PipelineConfig,
) -> GateReport {
    let mut report = GateReport::new();

    // Core fields hard-fail; everything else below is advisory.
    if design.name.trim().is_empty() {
        report.push_error("Workflow name is missing");
    }
    if design.steps.is_empty() {
        report.push_error("Workflow has no steps");
    }
    if !design.confidence.is_finite() || !(0.0..=1.0).contains(&design.confidence) {
        report.push_error(format!(
            "Confidence {} is outside the [0, 1] range",
            design.confidence
        ));
    } else if design.confidence < config.confidence_floor {
        report.push_warning(format!(
            "Designer confidence {:.2} is below the {:.2} floor; review before enabling",
            design.confidence, config.confidence_floor
        ));
    }

    // Every suggested plugin should actually be used by some action step.
    let mut used_plugins = HashSet::new();
    for_each_step(&design.steps, &mut |step, _| {
        if let StepKind::Action { plugin, .. } = &step.kind {
            used_plugins.insert(plugin.clone());
        }
    });
    for suggested in &design.suggested_plugins {
        if !used_plugins.contains(suggested) {
            report.push_warning(format!(
                "Suggested plugin '{suggested}' is not used by any action step"
            ));
        }
    }

    // Loops should carry an explicit iteration bound.
    for_each_step(&design.steps, &mut |step, _| {
        if let StepKind::Loop { max_iterations, .. } = &step.kind {
            if max_iterations.is_none() {
                report.push_warning(format!(
                    "Step {}: loop has no 'maxIterations' bound",
                    step.id
                ));
            }
        }
    });

    // Non-terminal steps should name an explicit successor, unless the
    // kind routes by itself.
    let last_index = design.steps.len().saturating_sub(1);
    for (index, step) in design.steps.iter().enumerate() {
        if index == last_index {
            continue;
        }
        let routes_itself = matches!(
            step.kind,
            StepKind::Conditional { .. } | StepKind::Switch { .. }
        );
        if !routes_itself && step.explicit_successors().is_empty() {
            report.push_warning(format!(
                "Step {}: no explicit successor; execution will fall through in declaration order",
                step.id
            ));
        }
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
