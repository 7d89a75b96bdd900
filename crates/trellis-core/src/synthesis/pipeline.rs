//! The synthesis pipeline orchestrator.
//!
//! Runs the stages in strict order: Stage 1 (design) -> Gate 1
//! (structural) -> Stage 2 (completion) -> Gate 2 (parameters, routed
//! through the repair loop on failure) -> Gate 3 (semantic) -> sealed
//! artifact. Dependencies are constructor-injected, so independent
//! requests run as fully independent pipeline instances sharing only a
//! read-only catalogue. This is the single place a failed stage becomes a
//! user-facing error; everything below returns typed results.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trellis_types::catalog::ActionCatalog;
use trellis_types::config::PipelineConfig;
use trellis_types::error::PipelineError;
use trellis_types::workflow::{GateReport, WorkflowArtifact};

use crate::repair::RepairEngine;
use crate::validate::{parameters, semantic, structural};

use super::completer;
use super::designer::{DesignError, WorkflowDesigner};

/// One synthesis pipeline: a design client, a repair client, and tuning.
pub struct SynthesisPipeline {
    designer: WorkflowDesigner,
    repair: RepairEngine,
    config: PipelineConfig,
}

impl SynthesisPipeline {
    pub fn new(designer: WorkflowDesigner, repair: RepairEngine, config: PipelineConfig) -> Self {
        Self {
            designer,
            repair,
            config,
        }
    }

    /// Turn a natural-language request into a validated workflow artifact.
    pub async fn synthesize(
        &self,
        request: &str,
        catalog: &ActionCatalog,
        cancellation: &CancellationToken,
    ) -> Result<WorkflowArtifact, PipelineError> {
        // Stage 1: structure from the reasoning model.
        check_cancelled(cancellation)?;
        let design = self
            .designer
            .design(request, catalog)
            .await
            .map_err(|e| match e {
                DesignError::Timeout(elapsed_secs) => PipelineError::Timeout {
                    stage: "stage1".to_string(),
                    elapsed_secs,
                },
                other => PipelineError::Design {
                    message: other.to_string(),
                },
            })?;

        // Gate 1: structural. Fatal on failure; nothing to repair yet.
        let gate1 = structural::validate(&design, catalog);
        log_warnings("gate1", &gate1);
        if !gate1.passed {
            return Err(PipelineError::Structural { report: gate1 });
        }

        // Stage 2: deterministic completion.
        check_cancelled(cancellation)?;
        let completion = completer::complete(&design);
        let mut design = completion.design;
        info!(
            new_inputs = completion.new_inputs.len(),
            fixes = completion.fixes.len(),
            "stage 2 completed the design"
        );

        // Gate 2: parameters. Failure routes through the repair loop and
        // a mandatory full re-validation before being treated as final.
        check_cancelled(cancellation)?;
        let mut gate2 = parameters::validate(&design, catalog);
        for fix in &completion.fixes {
            gate2.push_fix(fix.clone());
        }
        log_warnings("gate2", &gate2);
        if !gate2.passed {
            info!(errors = gate2.errors.len(), "gate 2 failed; entering repair");
            let repair_outcome = self
                .repair
                .repair(&mut design, &gate2, request, catalog)
                .await;

            let mut recheck = parameters::validate(&design, catalog);
            for fix in &repair_outcome.fixes {
                recheck.push_fix(fix.clone());
            }
            if !recheck.passed || repair_outcome.failure_count > 0 {
                for residual in repair_outcome.residual_errors {
                    if !recheck.errors.contains(&residual) {
                        recheck.errors.push(residual);
                        recheck.passed = false;
                    }
                }
                return Err(PipelineError::RepairExhausted { report: recheck });
            }
            info!(
                repaired = repair_outcome.success_count,
                "repair cleared gate 2"
            );
            gate2 = recheck;
        }

        // Gate 3: semantic review. Advisory except for core fields.
        let gate3 = semantic::validate(&design, catalog, &self.config);
        log_warnings("gate3", &gate3);
        if !gate3.passed {
            return Err(PipelineError::Semantic { report: gate3 });
        }

        info!(
            workflow = %design.name,
            steps = design.steps.len(),
            inputs = design.required_inputs.len(),
            fixes = gate2.fixes_applied.len(),
            "synthesis pipeline produced a validated workflow"
        );
        Ok(WorkflowArtifact::from(design))
    }
}

fn check_cancelled(cancellation: &CancellationToken) -> Result<(), PipelineError> {
    if cancellation.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn log_warnings(gate: &str, report: &GateReport) {
    for warning in &report.warnings {
        warn!(gate, warning = %warning, "validation warning");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
