//! Self-healing repair loop for Gate-2 failures.
//!
//! Each failing step is repaired in isolation: the engine extracts the
//! implicated step id from the error text, assembles a context window (the
//! step, up to two predecessors, up to two successors, and the full
//! parameter schema for action steps), and asks the "repair" model client
//! for a corrected version of that single step, constrained by a
//! structured output schema. The replacement is re-validated in isolation
//! before being spliced back in. Attempts are bounded per step; a step
//! that validated is never retried. The pipeline re-runs Gate 2 over the
//! full repaired design before declaring success.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use trellis_types::catalog::ActionCatalog;
use trellis_types::config::PipelineConfig;
use trellis_types::llm::{ChatMessage, CompletionRequest, OutputConfig, ToolChoice};
use trellis_types::workflow::{GateError, GateReport, StepKind, WorkflowDesign, WorkflowStep};

use crate::llm::BoxModelClient;
use crate::synthesis::prompt::{repair_system_prompt, repair_user_prompt};
use crate::synthesis::walk::for_each_step;
use crate::validate::parameters::validate_single_step;

// ---------------------------------------------------------------------------
// Step-id extraction
// ---------------------------------------------------------------------------

/// `Step <id>: <message>` -- the canonical Gate-2 error shape.
static STEP_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Step ([A-Za-z0-9_-]+):").expect("step prefix regex is valid")
});

/// `step '<id>'` -- quoted references inside error prose.
static QUOTED_STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"step '([A-Za-z0-9_-]+)'").expect("quoted step regex is valid")
});

/// Bare `stepN` tokens, the designer's conventional id shape.
static BARE_STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(step\d+[a-z]?)\b").expect("bare step regex is valid"));

/// Extract the step id implicated by a validation error message.
pub fn extract_step_id(message: &str) -> Option<String> {
    if let Some(c) = STEP_PREFIX_RE.captures(message) {
        return Some(c[1].to_string());
    }
    if let Some(c) = QUOTED_STEP_RE.captures(message) {
        return Some(c[1].to_string());
    }
    BARE_STEP_RE.captures(message).map(|c| c[1].to_string())
}

// ---------------------------------------------------------------------------
// Context and outcome types
// ---------------------------------------------------------------------------

/// Everything the repair prompt needs about one failing step.
#[derive(Debug, Clone)]
pub struct RepairContext {
    pub step_id: String,
    pub step_json: String,
    pub error: String,
    pub predecessors: Vec<String>,
    pub successors: Vec<String>,
    pub plugin: Option<String>,
    pub action: Option<String>,
    pub parameter_schema: Option<String>,
}

/// Aggregate result of one repair pass.
#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    pub repaired_steps: Vec<String>,
    pub success_count: usize,
    pub failure_count: usize,
    pub fixes: Vec<String>,
    /// Errors for steps that could not be repaired.
    pub residual_errors: Vec<GateError>,
}

#[derive(Debug, thiserror::Error)]
enum RepairCallError {
    #[error("repair model call failed: {0}")]
    Llm(String),

    #[error("repair call timed out after {0}s")]
    Timeout(u64),

    #[error("repair response was not a valid step: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// RepairEngine
// ---------------------------------------------------------------------------

/// Bounded single-step repair over an injected model client.
pub struct RepairEngine {
    client: BoxModelClient,
    model: String,
    config: PipelineConfig,
}

impl RepairEngine {
    pub fn new(client: BoxModelClient, model: String, config: PipelineConfig) -> Self {
        Self {
            client,
            model,
            config,
        }
    }

    /// Repair every step implicated by a Gate-2 report, in place.
    pub async fn repair(
        &self,
        design: &mut WorkflowDesign,
        report: &GateReport,
        original_request: &str,
        catalog: &ActionCatalog,
    ) -> RepairOutcome {
        let mut outcome = RepairOutcome::default();

        let mut known_ids = HashSet::new();
        for_each_step(&design.steps, &mut |step, _| {
            known_ids.insert(step.id.clone());
        });
        let declared: HashSet<String> = design
            .required_inputs
            .iter()
            .map(|i| i.name.clone())
            .collect();

        // Group errors by implicated step; each step is repaired once.
        let mut ordered_ids: Vec<String> = Vec::new();
        let mut errors_by_step: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        for error in &report.errors {
            let rendered = error.to_string();
            let id = error
                .step_id
                .clone()
                .or_else(|| extract_step_id(&rendered));
            match id {
                Some(id) if known_ids.contains(&id) => {
                    if !errors_by_step.contains_key(&id) {
                        ordered_ids.push(id.clone());
                    }
                    errors_by_step.entry(id).or_default().push(rendered);
                }
                _ => {
                    warn!(error = %rendered, "could not attribute error to a step");
                    outcome.failure_count += 1;
                    outcome.residual_errors.push(error.clone());
                }
            }
        }

        for step_id in ordered_ids {
            let messages = errors_by_step[&step_id].join("; ");
            let Some(context) = build_context(design, &step_id, &messages, catalog) else {
                outcome.failure_count += 1;
                outcome.residual_errors.push(GateError {
                    step_id: Some(step_id.clone()),
                    message: messages,
                });
                continue;
            };

            let mut repaired = false;
            for attempt in 1..=self.config.max_repair_attempts {
                debug!(step_id = %step_id, attempt, "requesting step repair");
                let candidate = match self.request_step(&context, original_request).await {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        warn!(step_id = %step_id, attempt, error = %e, "repair attempt failed");
                        continue;
                    }
                };
                if candidate.id != step_id {
                    warn!(
                        step_id = %step_id,
                        returned = %candidate.id,
                        attempt,
                        "repair changed the step id; rejecting"
                    );
                    continue;
                }
                let residual =
                    validate_single_step(&candidate, catalog, &known_ids, &declared);
                if !residual.is_empty() {
                    debug!(
                        step_id = %step_id,
                        attempt,
                        errors = residual.len(),
                        "repaired step still invalid"
                    );
                    continue;
                }

                // Validated: splice it in and stop retrying this step.
                if replace_step(&mut design.steps, &candidate) {
                    info!(step_id = %step_id, attempt, "step repaired");
                    outcome
                        .fixes
                        .push(format!("Repaired step {step_id}: {messages}"));
                    outcome.repaired_steps.push(step_id.clone());
                    outcome.success_count += 1;
                    repaired = true;
                }
                break;
            }

            if !repaired {
                outcome.failure_count += 1;
                outcome.residual_errors.push(GateError {
                    step_id: Some(step_id.clone()),
                    message: format!(
                        "unrepaired after {} attempts: {messages}",
                        self.config.max_repair_attempts
                    ),
                });
            }
        }

        outcome
    }

    /// One repair completion, constrained to a single corrected step.
    async fn request_step(
        &self,
        context: &RepairContext,
        original_request: &str,
    ) -> Result<WorkflowStep, RepairCallError> {
        let schema = schemars::schema_for!(WorkflowStep);
        let schema_value =
            serde_json::to_value(schema).expect("WorkflowStep schema serialization should not fail");

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(repair_user_prompt(
                context,
                original_request,
            ))],
            system: Some(repair_system_prompt()),
            max_tokens: self.config.design_max_tokens,
            temperature: Some(0.2),
            tools: vec![],
            tool_choice: ToolChoice::None,
            stop_sequences: None,
            output_config: Some(OutputConfig::strict_json_schema(
                "WorkflowStep",
                schema_value,
            )),
        };

        let response = tokio::time::timeout(
            Duration::from_secs(self.config.stage_timeout_secs),
            self.client.complete(&request),
        )
        .await
        .map_err(|_| RepairCallError::Timeout(self.config.stage_timeout_secs))?
        .map_err(|e| RepairCallError::Llm(e.to_string()))?;

        parse_step(&response.content)
    }
}

fn parse_step(content: &str) -> Result<WorkflowStep, RepairCallError> {
    match serde_json::from_str::<WorkflowStep>(content) {
        Ok(step) => Ok(step),
        Err(strict_err) => {
            let start = content.find('{');
            let end = content.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if e > s => serde_json::from_str(&content[s..=e])
                    .map_err(|e| RepairCallError::Parse(e.to_string())),
                _ => Err(RepairCallError::Parse(format!(
                    "no JSON object in response: {strict_err}"
                ))),
            }
        }
    }
}

/// Build the repair context: the step, its neighbors in its own sequence,
/// and the catalogue schema for action steps.
fn build_context(
    design: &WorkflowDesign,
    step_id: &str,
    error: &str,
    catalog: &ActionCatalog,
) -> Option<RepairContext> {
    let (siblings, index) = find_sequence(&design.steps, step_id)?;
    let step = &siblings[index];

    let to_json = |s: &WorkflowStep| {
        serde_json::to_string(s).expect("workflow step serializes to JSON")
    };
    let predecessors = siblings[index.saturating_sub(2)..index]
        .iter()
        .map(to_json)
        .collect();
    let successors = siblings[(index + 1)..siblings.len().min(index + 3)]
        .iter()
        .map(to_json)
        .collect();

    let (plugin, action, parameter_schema) = match &step.kind {
        StepKind::Action { plugin, action, .. } => {
            let schema = catalog
                .action_spec(plugin, action)
                .map(|spec| spec.parameters_schema.to_string());
            (Some(plugin.clone()), Some(action.clone()), schema)
        }
        _ => (None, None, None),
    };

    Some(RepairContext {
        step_id: step_id.to_string(),
        step_json: to_json(step),
        error: error.to_string(),
        predecessors,
        successors,
        plugin,
        action,
        parameter_schema,
    })
}

/// Locate the sequence (top level or a nested body) containing a step.
fn find_sequence<'a>(
    steps: &'a [WorkflowStep],
    step_id: &str,
) -> Option<(&'a [WorkflowStep], usize)> {
    if let Some(index) = steps.iter().position(|s| s.id == step_id) {
        return Some((steps, index));
    }
    for step in steps {
        for body in step.nested_bodies() {
            if let Some(found) = find_sequence(body, step_id) {
                return Some(found);
            }
        }
    }
    None
}

/// Replace a step (top level or nested) by id. Returns false if absent.
fn replace_step(steps: &mut [WorkflowStep], candidate: &WorkflowStep) -> bool {
    for step in steps.iter_mut() {
        if step.id == candidate.id {
            *step = candidate.clone();
            return true;
        }
        let replaced = match &mut step.kind {
            StepKind::Loop { loop_steps, .. } => replace_step(loop_steps, candidate),
            StepKind::ScatterGather { scatter, .. } => replace_step(&mut scatter.steps, candidate),
            _ => false,
        };
        if replaced {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
