//! Workflow domain types for Trellis.
//!
//! Defines the canonical typed workflow model: `WorkflowStep` (common
//! fields plus a closed `StepKind` union, tagged by `type` on the wire),
//! `RequiredInput`, the Stage-1 `WorkflowDesign`, the sealed
//! `WorkflowArtifact` handed to executors, and the `GateReport` shape all
//! validation gates return.
//!
//! The step union is deliberately closed: every kind declares exactly the
//! fields it carries, so a missing `iterateOver` or a `params`-nested
//! transform is a deserialization or gate error, not a latent runtime bug.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{Condition, ConditionOperator};

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// A single step in a workflow.
///
/// Common fields (`id`, `name`, successor edges, optional `executeIf`
/// guard) live on the struct; kind-specific fields live in the flattened
/// [`StepKind`] union. On the wire the kind tag appears as `type` next to
/// the common fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowStep {
    /// Unique step id (e.g. "step1").
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Unconditional successor step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Successor taken when the step succeeds (overrides `next`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Successor taken when the step fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Guard condition: when present and false, the step is skipped.
    /// Mutually exclusive with `next` (an ambiguous successor otherwise).
    #[serde(
        default,
        rename = "executeIf",
        skip_serializing_if = "Option::is_none"
    )]
    pub execute_if: Option<Condition>,
    /// Kind-specific payload, tagged by `type`.
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Kind-specific payload of a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepKind {
    /// Invoke a plugin action with concrete parameters.
    Action {
        plugin: String,
        action: String,
        #[serde(default)]
        params: Value,
    },
    /// Run a model over a prompt; output is addressed as `stepN.data.result`.
    #[serde(alias = "llm_decision")]
    AiProcessing {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_format: Option<String>,
    },
    /// Branch on a condition to `trueBranch`/`falseBranch`.
    Conditional {
        condition: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        true_branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        false_branch: Option<String>,
    },
    /// Iterate a body sequence over a collection.
    Loop {
        iterate_over: String,
        loop_steps: Vec<WorkflowStep>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },
    /// Fan a body sequence out over a collection with bounded concurrency.
    ScatterGather {
        scatter: ScatterSpec,
        gather: GatherSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrency: Option<u32>,
    },
    /// Reshape data. Fields are top-level, never nested under `params`.
    Transform {
        operation: String,
        input: String,
        #[serde(default)]
        config: Value,
    },
    /// Compare a resolved input against a configured value.
    Comparison {
        operation: ConditionOperator,
        input: String,
        #[serde(default)]
        config: Value,
    },
    /// Check a resolved input against declarative rules.
    Validation {
        input: String,
        rules: Vec<ValidationRule>,
    },
    /// Multi-way branch on a resolved value.
    Switch {
        input: String,
        cases: Vec<SwitchCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// Pause the run for a fixed duration.
    Delay { duration_ms: u64 },
    /// Pause the run until a human approves.
    HumanApproval {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    /// Invoke another workflow by name.
    SubWorkflow {
        workflow: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inputs: Option<Value>,
    },
}

/// Scatter half of a scatter-gather step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScatterSpec {
    /// Template resolving to the collection to fan out over.
    pub input: String,
    /// Sub-step sequence executed once per item.
    pub steps: Vec<WorkflowStep>,
}

/// Gather half of a scatter-gather step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GatherSpec {
    pub strategy: GatherStrategy,
    /// Fold expression for the `reduce` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// How scatter results are folded back together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GatherStrategy {
    /// Preserve the per-item result array.
    Collect,
    /// Shallow-merge all item results into one object.
    Merge,
    /// Fold via the configured expression.
    Reduce,
}

/// One case of a `switch` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SwitchCase {
    pub value: Value,
    pub next: String,
}

/// A declarative check applied by a `validation` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationRule {
    /// Path within the resolved input ("" means the whole value).
    #[serde(default)]
    pub field: String,
    pub check: ValidationCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The kind of check a validation rule performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCheck {
    Required,
    NonEmpty,
    Numeric,
    Text,
}

impl WorkflowStep {
    /// Stable label for the step kind (matches the wire tag).
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            StepKind::Action { .. } => "action",
            StepKind::AiProcessing { .. } => "ai_processing",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Loop { .. } => "loop",
            StepKind::ScatterGather { .. } => "scatter_gather",
            StepKind::Transform { .. } => "transform",
            StepKind::Comparison { .. } => "comparison",
            StepKind::Validation { .. } => "validation",
            StepKind::Switch { .. } => "switch",
            StepKind::Delay { .. } => "delay",
            StepKind::HumanApproval { .. } => "human_approval",
            StepKind::SubWorkflow { .. } => "sub_workflow",
        }
    }

    /// Whether this step's output is model-produced (addressed via `data.`).
    pub fn is_ai(&self) -> bool {
        matches!(self.kind, StepKind::AiProcessing { .. })
    }

    /// All successor step ids this step names explicitly.
    ///
    /// Covers `next`/`on_success`/`on_failure`, conditional branches, and
    /// switch cases. Guard conditions do not contribute edges.
    pub fn explicit_successors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(n) = &self.next {
            out.push(n);
        }
        if let Some(n) = &self.on_success {
            out.push(n);
        }
        if let Some(n) = &self.on_failure {
            out.push(n);
        }
        match &self.kind {
            StepKind::Conditional {
                true_branch,
                false_branch,
                ..
            } => {
                if let Some(t) = true_branch {
                    out.push(t);
                }
                if let Some(f) = false_branch {
                    out.push(f);
                }
            }
            StepKind::Switch { cases, default, .. } => {
                for case in cases {
                    out.push(&case.next);
                }
                if let Some(d) = default {
                    out.push(d);
                }
            }
            _ => {}
        }
        out
    }

    /// Branch targets of a conditional step (`trueBranch`/`falseBranch`).
    pub fn branch_targets(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Conditional {
                true_branch,
                false_branch,
                ..
            } => true_branch
                .iter()
                .chain(false_branch.iter())
                .map(String::as_str)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Nested step sequences (loop bodies, scatter bodies).
    pub fn nested_bodies(&self) -> Vec<&[WorkflowStep]> {
        match &self.kind {
            StepKind::Loop { loop_steps, .. } => vec![loop_steps.as_slice()],
            StepKind::ScatterGather { scatter, .. } => vec![scatter.steps.as_slice()],
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// RequiredInput
// ---------------------------------------------------------------------------

/// A user-supplied input discovered from `{{input.X}}` references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequiredInput {
    /// snake_case name, unique within a workflow.
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub label: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
}

fn default_true() -> bool {
    true
}

/// Widget/validation type of a required input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Email,
    Number,
    File,
    Select,
    Url,
    Date,
    Textarea,
    Json,
}

// ---------------------------------------------------------------------------
// WorkflowDesign (Stage 1 output)
// ---------------------------------------------------------------------------

/// The Stage-1 designer's output: workflow structure without a guaranteed
/// complete input schema. Stage 2 completes it; the gates validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDesign {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub workflow_type: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub required_inputs: Vec<RequiredInput>,
    #[serde(default)]
    pub suggested_plugins: Vec<String>,
    #[serde(default)]
    pub suggested_outputs: Vec<String>,
    /// Designer confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// WorkflowArtifact (sealed, post-gate)
// ---------------------------------------------------------------------------

/// The immutable artifact produced once a design passes all three gates.
///
/// This is the persisted / handed-off object; it JSON round-trips
/// losslessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowArtifact {
    pub agent_name: String,
    pub description: String,
    pub workflow_type: String,
    pub workflow_steps: Vec<WorkflowStep>,
    pub required_inputs: Vec<RequiredInput>,
    pub suggested_plugins: Vec<String>,
    pub suggested_outputs: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

impl From<WorkflowDesign> for WorkflowArtifact {
    fn from(design: WorkflowDesign) -> Self {
        Self {
            agent_name: design.name,
            description: design.description,
            workflow_type: design.workflow_type,
            workflow_steps: design.steps,
            required_inputs: design.required_inputs,
            suggested_plugins: design.suggested_plugins,
            suggested_outputs: design.suggested_outputs,
            confidence: design.confidence,
            reasoning: design.reasoning,
        }
    }
}

// ---------------------------------------------------------------------------
// GateReport
// ---------------------------------------------------------------------------

/// Result of one validation gate.
///
/// A failed gate blocks progression; warnings never block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateReport {
    pub passed: bool,
    pub errors: Vec<GateError>,
    pub warnings: Vec<String>,
    pub fixes_applied: Vec<String>,
}

impl GateReport {
    /// A fresh report that passes until an error is pushed.
    pub fn new() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            fixes_applied: Vec::new(),
        }
    }

    /// Record an error attributed to a step.
    pub fn push_step_error(&mut self, step_id: impl AsRef<str>, message: impl Into<String>) {
        self.passed = false;
        self.errors.push(GateError {
            step_id: Some(step_id.as_ref().to_string()),
            message: message.into(),
        });
    }

    /// Record an error not tied to any step.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.passed = false;
        self.errors.push(GateError {
            step_id: None,
            message: message.into(),
        });
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn push_fix(&mut self, message: impl Into<String>) {
        self.fixes_applied.push(message.into());
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: GateReport) {
        self.passed = self.passed && other.passed;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.fixes_applied.extend(other.fixes_applied);
    }

    /// Rendered error lines, `Step <id>: <message>` when attributable.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(GateError::to_string).collect()
    }
}

/// One gate error, optionally pinned to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step_id {
            Some(id) => write!(f, "Step {id}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Index steps by id for O(1) lookup during validation and execution.
pub fn index_steps(steps: &[WorkflowStep]) -> HashMap<&str, &WorkflowStep> {
    steps.iter().map(|s| (s.id.as_str(), s)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action_step(id: &str, plugin: &str, action: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: format!("Run {action}"),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Action {
                plugin: plugin.to_string(),
                action: action.to_string(),
                params: json!({"query": "{{input.search_query}}"}),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Step serde: tag placement and field casing
    // -----------------------------------------------------------------------

    #[test]
    fn test_action_step_wire_shape() {
        let step = action_step("step1", "google-mail", "search_emails");
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["type"], "action");
        assert_eq!(v["id"], "step1");
        assert_eq!(v["plugin"], "google-mail");
        assert_eq!(v["params"]["query"], "{{input.search_query}}");
    }

    #[test]
    fn test_conditional_uses_camel_case_branches() {
        let step = WorkflowStep {
            id: "step2".to_string(),
            name: "Check".to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Conditional {
                condition: Condition::Simple {
                    field: "{{step1.data.count}}".to_string(),
                    operator: ConditionOperator::Gt,
                    value: json!(0),
                },
                true_branch: Some("step3".to_string()),
                false_branch: Some("step4".to_string()),
            },
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["trueBranch"], "step3");
        assert_eq!(v["falseBranch"], "step4");
        let parsed: WorkflowStep = serde_json::from_value(v).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_loop_step_wire_shape() {
        let step = WorkflowStep {
            id: "step3".to_string(),
            name: "Per email".to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Loop {
                iterate_over: "{{step1.data.emails}}".to_string(),
                loop_steps: vec![action_step("step3a", "slack", "send_message")],
                max_iterations: Some(25),
            },
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["type"], "loop");
        assert_eq!(v["iterateOver"], "{{step1.data.emails}}");
        assert_eq!(v["maxIterations"], 25);
        assert_eq!(v["loopSteps"][0]["id"], "step3a");
    }

    #[test]
    fn test_execute_if_renamed_on_wire() {
        let mut step = action_step("step1", "p", "a");
        step.execute_if = Some(Condition::Simple {
            field: "{{input.flag}}".to_string(),
            operator: ConditionOperator::Eq,
            value: json!(true),
        });
        let v = serde_json::to_value(&step).unwrap();
        assert!(v.get("executeIf").is_some());
        assert!(v.get("execute_if").is_none());
    }

    #[test]
    fn test_llm_decision_alias_parses_as_ai_processing() {
        let raw = json!({
            "id": "step2",
            "name": "Summarize",
            "type": "llm_decision",
            "prompt": "Summarize: {{step1.data.messages}}"
        });
        let parsed: WorkflowStep = serde_json::from_value(raw).unwrap();
        assert!(parsed.is_ai());
        assert_eq!(parsed.kind_label(), "ai_processing");
    }

    #[test]
    fn test_scatter_gather_roundtrip() {
        let step = WorkflowStep {
            id: "step5".to_string(),
            name: "Fan out".to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::ScatterGather {
                scatter: ScatterSpec {
                    input: "{{step1.data.items}}".to_string(),
                    steps: vec![action_step("step5a", "http", "get")],
                },
                gather: GatherSpec {
                    strategy: GatherStrategy::Collect,
                    expression: None,
                },
                max_concurrency: Some(4),
            },
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["type"], "scatter_gather");
        assert_eq!(v["maxConcurrency"], 4);
        assert_eq!(v["gather"]["strategy"], "collect");
        let parsed: WorkflowStep = serde_json::from_value(v).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_transform_fields_are_top_level() {
        let step = WorkflowStep {
            id: "step4".to_string(),
            name: "Pick subjects".to_string(),
            next: None,
            on_success: None,
            on_failure: None,
            execute_if: None,
            kind: StepKind::Transform {
                operation: "map".to_string(),
                input: "{{step1.data.emails}}".to_string(),
                config: json!({"field": "subject"}),
            },
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["operation"], "map");
        assert_eq!(v["input"], "{{step1.data.emails}}");
        assert!(v.get("params").is_none());
    }

    #[test]
    fn test_all_remaining_kinds_roundtrip() {
        let steps = vec![
            WorkflowStep {
                id: "c".to_string(),
                name: "Compare".to_string(),
                next: None,
                on_success: None,
                on_failure: None,
                execute_if: None,
                kind: StepKind::Comparison {
                    operation: ConditionOperator::Ge,
                    input: "{{step1.data.total}}".to_string(),
                    config: json!({"value": 10}),
                },
            },
            WorkflowStep {
                id: "v".to_string(),
                name: "Validate".to_string(),
                next: None,
                on_success: None,
                on_failure: None,
                execute_if: None,
                kind: StepKind::Validation {
                    input: "{{input.payload}}".to_string(),
                    rules: vec![ValidationRule {
                        field: "email".to_string(),
                        check: ValidationCheck::Required,
                        message: None,
                    }],
                },
            },
            WorkflowStep {
                id: "s".to_string(),
                name: "Route".to_string(),
                next: None,
                on_success: None,
                on_failure: None,
                execute_if: None,
                kind: StepKind::Switch {
                    input: "{{step1.data.kind}}".to_string(),
                    cases: vec![SwitchCase {
                        value: json!("bug"),
                        next: "c".to_string(),
                    }],
                    default: Some("v".to_string()),
                },
            },
            WorkflowStep {
                id: "d".to_string(),
                name: "Wait".to_string(),
                next: None,
                on_success: None,
                on_failure: None,
                execute_if: None,
                kind: StepKind::Delay { duration_ms: 500 },
            },
            WorkflowStep {
                id: "h".to_string(),
                name: "Review".to_string(),
                next: None,
                on_success: None,
                on_failure: None,
                execute_if: None,
                kind: StepKind::HumanApproval {
                    prompt: "Approve the digest?".to_string(),
                    timeout_secs: Some(3600),
                },
            },
            WorkflowStep {
                id: "w".to_string(),
                name: "Publish".to_string(),
                next: None,
                on_success: None,
                on_failure: None,
                execute_if: None,
                kind: StepKind::SubWorkflow {
                    workflow: "publish-digest".to_string(),
                    inputs: Some(json!({"content": "{{step2.data.result}}"})),
                },
            },
        ];
        for step in steps {
            let v = serde_json::to_value(&step).unwrap();
            let parsed: WorkflowStep = serde_json::from_value(v).unwrap();
            assert_eq!(parsed, step);
        }
    }

    // -----------------------------------------------------------------------
    // Successor listing
    // -----------------------------------------------------------------------

    #[test]
    fn test_explicit_successors_collects_all_edges() {
        let step = WorkflowStep {
            id: "s".to_string(),
            name: "Route".to_string(),
            next: Some("n".to_string()),
            on_success: Some("ok".to_string()),
            on_failure: Some("err".to_string()),
            execute_if: None,
            kind: StepKind::Switch {
                input: "{{step1.data.kind}}".to_string(),
                cases: vec![SwitchCase {
                    value: json!("x"),
                    next: "case1".to_string(),
                }],
                default: Some("fallback".to_string()),
            },
        };
        let succ = step.explicit_successors();
        for expected in ["n", "ok", "err", "case1", "fallback"] {
            assert!(succ.contains(&expected), "missing {expected}");
        }
    }

    // -----------------------------------------------------------------------
    // RequiredInput
    // -----------------------------------------------------------------------

    #[test]
    fn test_required_input_wire_shape() {
        let input = RequiredInput {
            name: "search_query".to_string(),
            input_type: InputType::Text,
            label: "Search Query".to_string(),
            required: true,
            description: "What to search for".to_string(),
            reasoning: "Referenced by step1".to_string(),
        };
        let v = serde_json::to_value(&input).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["name"], "search_query");
        let parsed: RequiredInput = serde_json::from_value(v).unwrap();
        assert_eq!(parsed, input);
    }

    #[test]
    fn test_required_input_defaults_required_true() {
        let raw = json!({
            "name": "recipient_email",
            "type": "email",
            "label": "Recipient Email"
        });
        let parsed: RequiredInput = serde_json::from_value(raw).unwrap();
        assert!(parsed.required);
        assert_eq!(parsed.input_type, InputType::Email);
    }

    // -----------------------------------------------------------------------
    // Artifact
    // -----------------------------------------------------------------------

    #[test]
    fn test_artifact_from_design_and_json_roundtrip() {
        let design = WorkflowDesign {
            name: "email-digest".to_string(),
            description: "Summarize recent emails".to_string(),
            workflow_type: "automation".to_string(),
            steps: vec![action_step("step1", "google-mail", "search_emails")],
            required_inputs: vec![],
            suggested_plugins: vec!["google-mail".to_string()],
            suggested_outputs: vec!["summary".to_string()],
            confidence: 0.9,
            reasoning: "Single search plus summary".to_string(),
        };
        let artifact = WorkflowArtifact::from(design.clone());
        assert_eq!(artifact.agent_name, "email-digest");
        assert_eq!(artifact.workflow_steps.len(), 1);

        let json_str = serde_json::to_string(&artifact).unwrap();
        assert!(json_str.contains("\"agent_name\""));
        assert!(json_str.contains("\"workflow_steps\""));
        let parsed: WorkflowArtifact = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, artifact);
    }

    // -----------------------------------------------------------------------
    // GateReport
    // -----------------------------------------------------------------------

    #[test]
    fn test_gate_report_starts_passed() {
        let report = GateReport::new();
        assert!(report.passed);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_gate_report_error_flips_passed() {
        let mut report = GateReport::new();
        report.push_warning("low confidence");
        assert!(report.passed, "warnings never block");
        report.push_step_error("step3", "Missing required parameter 'spreadsheet_id'");
        assert!(!report.passed);
        assert_eq!(
            report.error_messages()[0],
            "Step step3: Missing required parameter 'spreadsheet_id'"
        );
    }

    #[test]
    fn test_gate_report_merge() {
        let mut a = GateReport::new();
        a.push_warning("w1");
        let mut b = GateReport::new();
        b.push_error("top-level problem");
        b.push_fix("rewrote reference");
        a.merge(b);
        assert!(!a.passed);
        assert_eq!(a.warnings.len(), 1);
        assert_eq!(a.fixes_applied.len(), 1);
    }
}
