//! Pipeline error taxonomy.
//!
//! Every stage returns a typed result; only the top-level orchestrator
//! turns a failed stage into the user-facing message. Each variant carries
//! the machine-readable gate detail and maps to a `stage_failed` tag for
//! diagnostics.

use thiserror::Error;

use crate::workflow::GateReport;

/// A failed synthesis-pipeline run.
///
/// `Display` renders the clear, specific user-facing message (never a
/// debug dump); `stage_failed()` and the variant payloads carry the
/// machine detail.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stage 1 failed to produce a usable design. Fatal, no repair possible.
    #[error("the designer could not produce a usable workflow: {message}")]
    Design { message: String },

    /// Gate 1 structural failure. Fatal: Stage 2 has not run yet, so there
    /// is nothing to repair.
    #[error("the generated workflow has structural problems: {}", summarize(.report))]
    Structural { report: GateReport },

    /// Bounded repair attempts were exhausted without clearing Gate 2.
    #[error("the workflow could not be repaired: {}", summarize(.report))]
    RepairExhausted { report: GateReport },

    /// Gate 3 found the artifact's core fields missing or invalid.
    #[error("the completed workflow failed final review: {}", summarize(.report))]
    Semantic { report: GateReport },

    /// A model-backed stage exceeded its deadline.
    #[error("the {stage} stage timed out after {elapsed_secs}s")]
    Timeout { stage: String, elapsed_secs: u64 },

    /// The run was cancelled by the caller.
    #[error("the request was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Machine-readable tag naming the stage that failed.
    pub fn stage_failed(&self) -> &str {
        match self {
            PipelineError::Design { .. } => "stage1",
            PipelineError::Structural { .. } => "gate1",
            PipelineError::RepairExhausted { .. } => "stage2",
            PipelineError::Semantic { .. } => "gate3",
            PipelineError::Timeout { stage, .. } => stage,
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// The full gate detail, when this failure carries one.
    pub fn gate_report(&self) -> Option<&GateReport> {
        match self {
            PipelineError::Structural { report }
            | PipelineError::RepairExhausted { report }
            | PipelineError::Semantic { report } => Some(report),
            _ => None,
        }
    }
}

/// Short error summary for the user-facing message: first error plus a
/// count of the rest.
fn summarize(report: &GateReport) -> String {
    let messages = report.error_messages();
    match messages.len() {
        0 => "no detail available".to_string(),
        1 => messages[0].clone(),
        n => format!("{} (and {} more)", messages[0], n - 1),
    }
}
