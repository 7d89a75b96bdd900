//! The workflow DAG interpreter.
//!
//! `WorkflowRunner` walks a validated `WorkflowArtifact` step by step
//! against a `Scope` value store. Successor selection: an explicit edge
//! first (`on_success`/`next`, a conditional branch, a switch case),
//! otherwise fall-through in declaration order; a step with neither is
//! terminal. `executeIf` guards skip their step without jumping. Action
//! failures follow `on_failure` when present and fail the run otherwise.
//! Loops re-enter their acyclic body up to the iteration bound;
//! scatter-gather fans its body out with bounded concurrency and always
//! gathers every tagged item outcome. Every external call is wrapped in a
//! timeout; human-approval steps pause the run resumably.

pub mod eval;
pub mod scatter;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use trellis_types::condition::ConditionOperator;
use trellis_types::config::RunnerConfig;
use trellis_types::execution::{RunReport, RunStatus, StepRecord, StepRunStatus};
use trellis_types::llm::{ChatMessage, CompletionRequest, ToolChoice};
use trellis_types::workflow::{
    StepKind, ValidationCheck, WorkflowArtifact, WorkflowStep,
};

use crate::executor::ActionExecutor;
use crate::expression::{Scope, resolve, stringify};
use crate::llm::BoxModelClient;

use self::eval::{apply_transform, evaluate_condition};

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Interprets validated workflow artifacts against injected ports.
pub struct WorkflowRunner<E: ActionExecutor> {
    executor: E,
    client: BoxModelClient,
    model: String,
    config: RunnerConfig,
    sub_workflows: HashMap<String, WorkflowArtifact>,
}

/// How one step sequence ended.
enum SeqOutcome {
    Completed,
    Approval { step_id: String, prompt: String },
    Failed(String),
    Cancelled,
}

/// What one executed step asks the driver to do next.
enum StepFlow {
    /// Store the output and continue along success edges.
    Done(Value),
    /// Continue at the given target (conditional/switch routing).
    Branch { output: Value, target: Option<String> },
    /// The step failed; follow `on_failure` or fail the sequence.
    Fail { error: String, output: Option<Value> },
    /// Pause the run for human approval.
    Approval { prompt: String },
}

impl<E: ActionExecutor> WorkflowRunner<E> {
    pub fn new(executor: E, client: BoxModelClient, model: String, config: RunnerConfig) -> Self {
        Self {
            executor,
            client,
            model,
            config,
            sub_workflows: HashMap::new(),
        }
    }

    /// Register workflows resolvable by `sub_workflow` steps.
    pub fn with_sub_workflows(mut self, workflows: HashMap<String, WorkflowArtifact>) -> Self {
        self.sub_workflows = workflows;
        self
    }

    /// Execute a validated artifact to a terminal state.
    pub async fn run(
        &self,
        artifact: &WorkflowArtifact,
        inputs: HashMap<String, Value>,
        user_id: &str,
        cancellation: &CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let mut records = Vec::new();

        // Required inputs must be present before anything executes.
        for required in &artifact.required_inputs {
            if required.required && !inputs.contains_key(&required.name) {
                return RunReport {
                    run_id,
                    status: RunStatus::Failed {
                        error: format!("required input '{}' was not provided", required.name),
                    },
                    records,
                    outputs: HashMap::new(),
                    started_at,
                    completed_at: Some(Utc::now()),
                };
            }
        }

        let mut scope = Scope::with_inputs(inputs);
        let outcome = self
            .run_sequence(
                &artifact.workflow_steps,
                &mut scope,
                0,
                &mut records,
                user_id,
                cancellation,
            )
            .await;

        let status = match outcome {
            SeqOutcome::Completed => RunStatus::Completed,
            SeqOutcome::Approval { step_id, prompt } => {
                RunStatus::AwaitingApproval { step_id, prompt }
            }
            SeqOutcome::Failed(error) => RunStatus::Failed { error },
            SeqOutcome::Cancelled => RunStatus::Cancelled,
        };

        RunReport {
            run_id,
            status,
            records,
            outputs: scope.step_outputs().clone(),
            started_at,
            completed_at: Some(Utc::now()),
        }
    }

    /// Drive one step sequence (the top level, or a loop/scatter body).
    fn run_sequence<'a>(
        &'a self,
        steps: &'a [WorkflowStep],
        scope: &'a mut Scope,
        sub_depth: u32,
        records: &'a mut Vec<StepRecord>,
        user_id: &'a str,
        cancellation: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = SeqOutcome> + Send + 'a>> {
        Box::pin(async move {
            let index_of: HashMap<&str, usize> = steps
                .iter()
                .enumerate()
                .map(|(i, s)| (s.id.as_str(), i))
                .collect();

            let mut index = 0usize;
            while index < steps.len() {
                if cancellation.is_cancelled() {
                    return SeqOutcome::Cancelled;
                }
                let step = &steps[index];

                // Guarded skip: a false `executeIf` skips without jumping.
                if let Some(guard) = &step.execute_if {
                    match evaluate_condition(guard, scope) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(step_id = %step.id, "guard false, skipping step");
                            records.push(StepRecord {
                                step_id: step.id.clone(),
                                step_name: step.name.clone(),
                                status: StepRunStatus::Skipped,
                                output: None,
                                error: None,
                            });
                            index += 1;
                            continue;
                        }
                        Err(e) => return SeqOutcome::Failed(format!(
                            "step {}: guard evaluation failed: {e}",
                            step.id
                        )),
                    }
                }

                let flow = self
                    .execute_step(step, scope, sub_depth, user_id, cancellation)
                    .await;

                match flow {
                    StepFlow::Done(output) => {
                        scope.set_step_output(&step.id, output.clone());
                        records.push(StepRecord {
                            step_id: step.id.clone(),
                            step_name: step.name.clone(),
                            status: StepRunStatus::Completed,
                            output: Some(output),
                            error: None,
                        });
                        let target = step.on_success.as_deref().or(step.next.as_deref());
                        match jump(&index_of, target, index) {
                            Ok(next_index) => index = next_index,
                            Err(e) => return SeqOutcome::Failed(e),
                        }
                    }
                    StepFlow::Branch { output, target } => {
                        scope.set_step_output(&step.id, output.clone());
                        records.push(StepRecord {
                            step_id: step.id.clone(),
                            step_name: step.name.clone(),
                            status: StepRunStatus::Completed,
                            output: Some(output),
                            error: None,
                        });
                        match jump(&index_of, target.as_deref(), index) {
                            Ok(next_index) => index = next_index,
                            Err(e) => return SeqOutcome::Failed(e),
                        }
                    }
                    StepFlow::Fail { error, output } => {
                        warn!(step_id = %step.id, error = %error, "step failed");
                        records.push(StepRecord {
                            step_id: step.id.clone(),
                            step_name: step.name.clone(),
                            status: StepRunStatus::Failed,
                            output,
                            error: Some(error.clone()),
                        });
                        match &step.on_failure {
                            Some(target) => {
                                match jump(&index_of, Some(target), index) {
                                    Ok(next_index) => index = next_index,
                                    Err(e) => return SeqOutcome::Failed(e),
                                }
                            }
                            None => {
                                return SeqOutcome::Failed(format!(
                                    "step {} failed: {error}",
                                    step.id
                                ));
                            }
                        }
                    }
                    StepFlow::Approval { prompt } => {
                        return SeqOutcome::Approval {
                            step_id: step.id.clone(),
                            prompt,
                        };
                    }
                }
            }
            SeqOutcome::Completed
        })
    }

    /// Execute one step and report how to proceed.
    async fn execute_step(
        &self,
        step: &WorkflowStep,
        scope: &mut Scope,
        sub_depth: u32,
        user_id: &str,
        cancellation: &CancellationToken,
    ) -> StepFlow {
        match &step.kind {
            StepKind::Action {
                plugin,
                action,
                params,
            } => {
                let resolved = match resolve_value(params, scope) {
                    Ok(v) => v,
                    Err(e) => return StepFlow::Fail {
                        error: e.to_string(),
                        output: None,
                    },
                };
                let call = self.executor.execute(user_id, plugin, action, &resolved);
                match tokio::time::timeout(
                    Duration::from_secs(self.config.step_timeout_secs),
                    call,
                )
                .await
                {
                    Ok(Ok(outcome)) if outcome.success => {
                        StepFlow::Done(json!({"data": outcome.data.unwrap_or(Value::Null)}))
                    }
                    Ok(Ok(outcome)) => StepFlow::Fail {
                        error: outcome
                            .error
                            .unwrap_or_else(|| "action reported failure".to_string()),
                        output: outcome.data.map(|d| json!({"data": d})),
                    },
                    Ok(Err(fault)) => StepFlow::Fail {
                        error: fault.to_string(),
                        output: None,
                    },
                    Err(_) => StepFlow::Fail {
                        error: format!(
                            "action '{plugin}.{action}' timed out after {}s",
                            self.config.step_timeout_secs
                        ),
                        output: None,
                    },
                }
            }

            StepKind::AiProcessing { prompt, input, .. } => {
                let mut rendered = match resolve(prompt, scope) {
                    Ok(v) => stringify(&v),
                    Err(e) => return StepFlow::Fail {
                        error: e.to_string(),
                        output: None,
                    },
                };
                if let Some(input) = input {
                    match resolve(input, scope) {
                        Ok(v) => {
                            rendered.push_str("\n\nInput:\n");
                            rendered.push_str(&stringify(&v));
                        }
                        Err(e) => {
                            return StepFlow::Fail {
                                error: e.to_string(),
                                output: None,
                            };
                        }
                    }
                }
                let request = CompletionRequest {
                    model: self.model.clone(),
                    messages: vec![ChatMessage::user(rendered)],
                    system: None,
                    max_tokens: self.config.ai_max_tokens,
                    temperature: None,
                    tools: vec![],
                    tool_choice: ToolChoice::None,
                    stop_sequences: None,
                    output_config: None,
                };
                match tokio::time::timeout(
                    Duration::from_secs(self.config.step_timeout_secs),
                    self.client.complete(&request),
                )
                .await
                {
                    Ok(Ok(response)) => StepFlow::Done(ai_output(&response.content)),
                    Ok(Err(e)) => StepFlow::Fail {
                        error: format!("model call failed: {e}"),
                        output: None,
                    },
                    Err(_) => StepFlow::Fail {
                        error: format!(
                            "model call timed out after {}s",
                            self.config.step_timeout_secs
                        ),
                        output: None,
                    },
                }
            }

            StepKind::Conditional {
                condition,
                true_branch,
                false_branch,
            } => match evaluate_condition(condition, scope) {
                Ok(met) => {
                    let target = if met { true_branch } else { false_branch };
                    StepFlow::Branch {
                        output: json!({"data": {"conditionMet": met}}),
                        target: target.clone(),
                    }
                }
                Err(e) => StepFlow::Fail {
                    error: e.to_string(),
                    output: None,
                },
            },

            StepKind::Loop {
                iterate_over,
                loop_steps,
                max_iterations,
            } => {
                let collection = match resolve(iterate_over, scope) {
                    Ok(Value::Array(items)) => items,
                    Ok(other) => {
                        return StepFlow::Fail {
                            error: format!(
                                "loop input resolved to {} instead of an array",
                                type_label(&other)
                            ),
                            output: None,
                        };
                    }
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                let cap = max_iterations.unwrap_or(self.config.default_loop_iterations) as usize;
                let mut results = Vec::new();
                for (iteration, item) in collection.into_iter().take(cap).enumerate() {
                    let mut body_scope = scope.child_with_loop(item, iteration);
                    let mut body_records = Vec::new();
                    let outcome = self
                        .run_sequence(
                            loop_steps,
                            &mut body_scope,
                            sub_depth,
                            &mut body_records,
                            user_id,
                            cancellation,
                        )
                        .await;
                    match outcome {
                        SeqOutcome::Completed => {
                            results.push(last_output(&body_records));
                        }
                        SeqOutcome::Approval { step_id, prompt } => {
                            return StepFlow::Approval {
                                prompt: format!("[iteration {iteration}, step {step_id}] {prompt}"),
                            };
                        }
                        SeqOutcome::Failed(error) => {
                            return StepFlow::Fail {
                                error: format!("iteration {iteration} failed: {error}"),
                                output: Some(json!({
                                    "data": {"iterations": iteration, "results": results}
                                })),
                            };
                        }
                        SeqOutcome::Cancelled => {
                            return StepFlow::Fail {
                                error: "run cancelled".to_string(),
                                output: None,
                            };
                        }
                    }
                }
                let iterations = results.len();
                StepFlow::Done(json!({"data": {"iterations": iterations, "results": results}}))
            }

            StepKind::ScatterGather {
                scatter: scatter_spec,
                gather,
                max_concurrency,
            } => {
                let items = match resolve(&scatter_spec.input, scope) {
                    Ok(Value::Array(items)) => items,
                    Ok(other) => {
                        return StepFlow::Fail {
                            error: format!(
                                "scatter input resolved to {} instead of an array",
                                type_label(&other)
                            ),
                            output: None,
                        };
                    }
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                let total = items.len();
                let bound = max_concurrency
                    .unwrap_or(1)
                    .clamp(1, self.config.max_concurrency_limit.clamp(1, 10))
                    as usize;

                let frozen: &Scope = scope;
                let outcomes = scatter::run_items(items, bound, |index, item| {
                    let mut item_scope = frozen.child_with_loop(item, index);
                    async move {
                        let mut item_records = Vec::new();
                        match self
                            .run_sequence(
                                &scatter_spec.steps,
                                &mut item_scope,
                                sub_depth,
                                &mut item_records,
                                user_id,
                                cancellation,
                            )
                            .await
                        {
                            SeqOutcome::Completed => Ok(last_output(&item_records)),
                            SeqOutcome::Failed(error) => Err(error),
                            SeqOutcome::Approval { .. } => {
                                Err("approval steps are not supported inside scatter bodies"
                                    .to_string())
                            }
                            SeqOutcome::Cancelled => Err("run cancelled".to_string()),
                        }
                    }
                })
                .await;

                let failure_count = outcomes.iter().filter(|o| !o.success).count();
                let gathered = match scatter::gather_results(
                    gather.strategy,
                    gather.expression.as_deref(),
                    &outcomes,
                    scope,
                ) {
                    Ok(v) => v,
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                let output = json!({
                    "data": {
                        "result": gathered,
                        "items": outcomes,
                        "total": total,
                        "failureCount": failure_count,
                    }
                });
                if failure_count > 0 {
                    StepFlow::Fail {
                        error: format!("{failure_count} of {total} scatter items failed"),
                        output: Some(output),
                    }
                } else {
                    StepFlow::Done(output)
                }
            }

            StepKind::Transform {
                operation,
                input,
                config,
            } => {
                let resolved = match resolve(input, scope) {
                    Ok(v) => v,
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                match apply_transform(operation, resolved, config, scope) {
                    Ok(result) => StepFlow::Done(json!({"data": {"result": result}})),
                    Err(e) => StepFlow::Fail {
                        error: e.to_string(),
                        output: None,
                    },
                }
            }

            StepKind::Comparison {
                operation,
                input,
                config,
            } => {
                let left = match resolve(input, scope) {
                    Ok(v) => v,
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                let right = config.get("value").cloned().unwrap_or(Value::Null);
                let right = match &right {
                    Value::String(s) if s.contains("{{") => match resolve(s, scope) {
                        Ok(v) => v,
                        Err(e) => {
                            return StepFlow::Fail {
                                error: e.to_string(),
                                output: None,
                            };
                        }
                    },
                    _ => right,
                };
                match eval::compare(*operation, &left, &right) {
                    Ok(result) => StepFlow::Done(json!({"data": {"result": result}})),
                    Err(e) => StepFlow::Fail {
                        error: e.to_string(),
                        output: None,
                    },
                }
            }

            StepKind::Validation { input, rules } => {
                let resolved = match resolve(input, scope) {
                    Ok(v) => v,
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                let mut errors = Vec::new();
                for rule in rules {
                    let value = if rule.field.is_empty() {
                        Some(&resolved)
                    } else {
                        resolved.get(&rule.field)
                    };
                    let ok = match rule.check {
                        ValidationCheck::Required => {
                            value.is_some_and(|v| !v.is_null())
                        }
                        ValidationCheck::NonEmpty => value.is_some_and(|v| match v {
                            Value::String(s) => !s.is_empty(),
                            Value::Array(a) => !a.is_empty(),
                            Value::Object(m) => !m.is_empty(),
                            Value::Null => false,
                            _ => true,
                        }),
                        ValidationCheck::Numeric => value.is_some_and(Value::is_number),
                        ValidationCheck::Text => value.is_some_and(Value::is_string),
                    };
                    if !ok {
                        errors.push(rule.message.clone().unwrap_or_else(|| {
                            format!("field '{}' failed {:?} check", rule.field, rule.check)
                        }));
                    }
                }
                StepFlow::Done(json!({"data": {"valid": errors.is_empty(), "errors": errors}}))
            }

            StepKind::Switch {
                input,
                cases,
                default,
            } => {
                let value = match resolve(input, scope) {
                    Ok(v) => v,
                    Err(e) => {
                        return StepFlow::Fail {
                            error: e.to_string(),
                            output: None,
                        };
                    }
                };
                let matched = cases.iter().find(|case| {
                    eval::compare(ConditionOperator::Eq, &value, &case.value).unwrap_or(false)
                });
                let target = matched
                    .map(|case| case.next.clone())
                    .or_else(|| default.clone());
                StepFlow::Branch {
                    output: json!({"data": {"matched": matched.map(|c| c.value.clone())}}),
                    target,
                }
            }

            StepKind::Delay { duration_ms } => {
                let capped = (*duration_ms).min(self.config.delay_cap_ms);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(capped)) => {
                        StepFlow::Done(json!({"data": {"delayedMs": capped}}))
                    }
                    _ = cancellation.cancelled() => StepFlow::Fail {
                        error: "run cancelled".to_string(),
                        output: None,
                    },
                }
            }

            StepKind::HumanApproval { prompt, .. } => {
                let rendered = resolve(prompt, scope)
                    .map(|v| stringify(&v))
                    .unwrap_or_else(|_| prompt.clone());
                StepFlow::Approval { prompt: rendered }
            }

            StepKind::SubWorkflow { workflow, inputs } => {
                if sub_depth >= self.config.max_sub_workflow_depth {
                    return StepFlow::Fail {
                        error: format!(
                            "sub-workflow depth {} exceeds maximum {}",
                            sub_depth + 1,
                            self.config.max_sub_workflow_depth
                        ),
                        output: None,
                    };
                }
                let Some(sub) = self.sub_workflows.get(workflow) else {
                    return StepFlow::Fail {
                        error: format!("unknown sub-workflow '{workflow}'"),
                        output: None,
                    };
                };
                let sub_inputs = match inputs {
                    Some(raw) => match resolve_value(raw, scope) {
                        Ok(Value::Object(map)) => map.into_iter().collect(),
                        Ok(_) => HashMap::new(),
                        Err(e) => {
                            return StepFlow::Fail {
                                error: e.to_string(),
                                output: None,
                            };
                        }
                    },
                    None => HashMap::new(),
                };
                let mut sub_scope = Scope::with_inputs(sub_inputs);
                let mut sub_records = Vec::new();
                let outcome = self
                    .run_sequence(
                        &sub.workflow_steps,
                        &mut sub_scope,
                        sub_depth + 1,
                        &mut sub_records,
                        user_id,
                        cancellation,
                    )
                    .await;
                match outcome {
                    SeqOutcome::Completed => StepFlow::Done(json!({
                        "data": {"outputs": sub_scope.step_outputs().clone()}
                    })),
                    SeqOutcome::Failed(error) => StepFlow::Fail {
                        error: format!("sub-workflow '{workflow}' failed: {error}"),
                        output: None,
                    },
                    SeqOutcome::Approval { step_id, prompt } => StepFlow::Approval {
                        prompt: format!("[sub-workflow {workflow}, step {step_id}] {prompt}"),
                    },
                    SeqOutcome::Cancelled => StepFlow::Fail {
                        error: "run cancelled".to_string(),
                        output: None,
                    },
                }
            }
        }
    }
}

/// Resolve the index to continue at: an explicit target, or fall-through.
fn jump(
    index_of: &HashMap<&str, usize>,
    target: Option<&str>,
    current: usize,
) -> Result<usize, String> {
    match target {
        Some(id) => index_of
            .get(id)
            .copied()
            .ok_or_else(|| format!("edge target '{id}' is not in this sequence")),
        None => Ok(current + 1),
    }
}

/// Output of the last completed step in a body run.
fn last_output(records: &[StepRecord]) -> Value {
    records
        .iter()
        .rev()
        .find(|r| r.status == StepRunStatus::Completed)
        .and_then(|r| r.output.clone())
        .unwrap_or(Value::Null)
}

/// Model output stored so every permitted address
/// (`data.result` and its aliases) resolves.
fn ai_output(content: &str) -> Value {
    json!({
        "data": {
            "result": content,
            "response": content,
            "output": content,
            "summary": content,
            "analysis": content,
        }
    })
}

/// Resolve every string leaf of a JSON value against the scope.
fn resolve_value(value: &Value, scope: &Scope) -> Result<Value, crate::expression::ExpressionError> {
    Ok(match value {
        Value::String(s) => resolve(s, scope)?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, scope))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, scope)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
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
