//! The execution governor's conversation loop.
//!
//! `ExecutionGovernor` drives one LLM tool-calling conversation to a
//! terminal state:
//!
//! - one completion per iteration, full tool catalogue, `tool_choice`
//!   advisory (never forced)
//! - per-iteration and cumulative token caps; a breach is fatal and never
//!   retried, since retrying would only burn more budget
//! - tool calls executed through the injected `ActionExecutor` in call
//!   order, with failures surfaced back into the conversation as
//!   structured messages rather than raised
//! - a sliding signature window that halts pathological repetition
//! - oversized tool results truncated with a machine-readable note
//! - the iteration cap, reached without completion, is recoverable
//!   (`MaxIterationsReached`), distinct from the fatal trips

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trellis_types::config::GovernorConfig;
use trellis_types::execution::{
    ExecutionReport, GovernorOutcome, TokenTotals, ToolCallRecord,
};
use trellis_types::llm::{ChatMessage, CompletionRequest, ToolChoice, ToolSpec};

use crate::executor::ActionExecutor;
use crate::llm::BoxModelClient;

use super::budget::{BudgetStatus, RunBudget};
use super::truncate::truncate_tool_result;
use super::window::SignatureWindow;

/// Drives governed tool-calling runs against one model client and one
/// action executor. Stateless across runs; every `run` call is
/// independent.
pub struct ExecutionGovernor<E: ActionExecutor> {
    client: BoxModelClient,
    executor: E,
    model: String,
    config: GovernorConfig,
}

impl<E: ActionExecutor> ExecutionGovernor<E> {
    pub fn new(client: BoxModelClient, executor: E, model: String, config: GovernorConfig) -> Self {
        Self {
            client,
            executor,
            model,
            config,
        }
    }

    /// Run one conversation to a terminal state.
    pub async fn run(
        &self,
        user_id: &str,
        system_prompt: &str,
        user_message: &str,
        tools: Vec<ToolSpec>,
        cancellation: &CancellationToken,
    ) -> ExecutionReport {
        let start = Instant::now();
        let budget = RunBudget::new(self.config.max_total_tokens);
        let mut window = SignatureWindow::new(self.config.loop_window);
        let mut totals = TokenTotals::default();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut messages = vec![ChatMessage::user(user_message)];

        for iteration in 1..=self.config.max_iterations {
            if cancellation.is_cancelled() {
                return finish(
                    GovernorOutcome::Failed,
                    String::new(),
                    Some("run cancelled".to_string()),
                    records,
                    totals,
                    iteration - 1,
                    start,
                );
            }

            let request = CompletionRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                system: Some(system_prompt.to_string()),
                max_tokens: self.config.completion_max_tokens,
                temperature: None,
                tools: tools.clone(),
                tool_choice: ToolChoice::Auto,
                stop_sequences: None,
                output_config: None,
            };

            let response = match tokio::time::timeout(
                Duration::from_secs(self.config.request_timeout_secs),
                self.client.complete(&request),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return finish(
                        GovernorOutcome::Failed,
                        String::new(),
                        Some(format!("model call failed: {e}")),
                        records,
                        totals,
                        iteration,
                        start,
                    );
                }
                Err(_) => {
                    return finish(
                        GovernorOutcome::Failed,
                        String::new(),
                        Some(format!(
                            "model call timed out after {}s",
                            self.config.request_timeout_secs
                        )),
                        records,
                        totals,
                        iteration,
                        start,
                    );
                }
            };

            let iteration_tokens = response.usage.total();
            totals.add_usage(&response.usage);

            // Budget breaches are fatal, even on the first iteration.
            if iteration_tokens > self.config.max_tokens_per_iteration {
                return finish(
                    GovernorOutcome::TokenLimitExceeded,
                    String::new(),
                    Some(format!(
                        "iteration used {iteration_tokens} tokens, above the per-iteration cap of {}",
                        self.config.max_tokens_per_iteration
                    )),
                    records,
                    totals,
                    iteration,
                    start,
                );
            }
            match budget.add_tokens(iteration_tokens) {
                BudgetStatus::Exhausted => {
                    return finish(
                        GovernorOutcome::CircuitBreakerTripped,
                        String::new(),
                        Some(format!(
                            "cumulative usage {} tokens reached the total cap of {}",
                            budget.tokens_used(),
                            budget.total_budget()
                        )),
                        records,
                        totals,
                        iteration,
                        start,
                    );
                }
                BudgetStatus::Warning => {
                    warn!(
                        tokens_used = budget.tokens_used(),
                        budget_total = budget.total_budget(),
                        "run has consumed 80% of its token budget"
                    );
                }
                BudgetStatus::Ok => {}
            }

            // A response with no tool calls is the terminal answer.
            if response.tool_calls.is_empty() {
                return finish(
                    GovernorOutcome::Completed,
                    response.content,
                    None,
                    records,
                    totals,
                    iteration,
                    start,
                );
            }

            messages.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Execute in call order; results are fed back in the same
            // order to keep the message history deterministic.
            for call in &response.tool_calls {
                let (plugin, action) = call.plugin_action();
                debug!(iteration, plugin, action, "executing tool call");

                let result_value = self.execute_one(user_id, plugin, action, &call.arguments).await;
                let success = result_value
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let truncated = truncate_tool_result(&result_value, self.config.tool_result_char_limit);

                records.push(ToolCallRecord {
                    plugin: plugin.to_string(),
                    action: action.to_string(),
                    parameters: call.arguments.clone(),
                    result: truncated.clone(),
                    success,
                });
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    crate::expression::stringify(&truncated),
                ));

                window.record(call.signature());
                if window.tripped() {
                    let signature = window.repeated_signature().unwrap_or_default().to_string();
                    return finish(
                        GovernorOutcome::LoopDetected,
                        String::new(),
                        Some(format!(
                            "tool '{signature}' was called {} consecutive times",
                            self.config.loop_window
                        )),
                        records,
                        totals,
                        iteration,
                        start,
                    );
                }
            }
        }

        finish(
            GovernorOutcome::MaxIterationsReached,
            String::new(),
            Some(format!(
                "no final response after {} iterations",
                self.config.max_iterations
            )),
            records,
            totals,
            self.config.max_iterations,
            start,
        )
    }

    /// Execute one tool call, converting every failure mode into a
    /// structured result value. Never propagates an error.
    async fn execute_one(&self, user_id: &str, plugin: &str, action: &str, params: &Value) -> Value {
        let call = self.executor.execute(user_id, plugin, action, params);
        match tokio::time::timeout(Duration::from_secs(self.config.tool_timeout_secs), call).await {
            Ok(Ok(outcome)) => serde_json::to_value(&outcome).unwrap_or_else(|e| {
                json!({"success": false, "error": format!("unserializable tool result: {e}")})
            }),
            Ok(Err(fault)) => {
                warn!(plugin, action, error = %fault, "tool execution fault");
                json!({"success": false, "error": fault.to_string()})
            }
            Err(_) => json!({
                "success": false,
                "error": format!(
                    "tool execution timed out after {}s",
                    self.config.tool_timeout_secs
                ),
            }),
        }
    }
}

fn finish(
    outcome: GovernorOutcome,
    response: String,
    error: Option<String>,
    tool_calls: Vec<ToolCallRecord>,
    tokens_used: TokenTotals,
    iterations: u32,
    start: Instant,
) -> ExecutionReport {
    ExecutionReport {
        success: outcome == GovernorOutcome::Completed,
        response,
        tool_calls,
        tokens_used,
        execution_time_ms: start.elapsed().as_millis() as u64,
        iterations,
        outcome,
        error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use trellis_types::execution::ActionOutcome;
    use trellis_types::llm::{LlmError, ModelResponse, StopReason, ToolCallRequest, Usage};

    use crate::executor::ExecutorError;
    use crate::llm::ModelClient;

    // -----------------------------------------------------------------------
    // Mocks
    // -----------------------------------------------------------------------

    /// Model client that replays a scripted sequence of responses. Once
    /// the script is exhausted it keeps returning the last entry.
    struct ScriptedModel {
        script: Mutex<Vec<ModelResponse>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<ModelResponse>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    impl ModelClient for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<ModelResponse, LlmError> {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                Ok(script[0].clone())
            }
        }
    }

    fn text_response(content: &str, tokens: u32) -> ModelResponse {
        ModelResponse {
            id: "msg_1".to_string(),
            content: content.to_string(),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: tokens,
                output_tokens: 10,
            },
        }
    }

    fn tool_response(name: &str, tokens: u32) -> ModelResponse {
        ModelResponse {
            id: "msg_t".to_string(),
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: json!({"q": 1}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: Usage {
                input_tokens: tokens,
                output_tokens: 20,
            },
        }
    }

    /// Executor that counts calls and returns a fixed outcome.
    struct CountingExecutor {
        calls: AtomicUsize,
        outcome: ActionOutcome,
    }

    impl CountingExecutor {
        fn succeeding(data: Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: ActionOutcome::ok(data),
            }
        }

        fn failing(error: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: ActionOutcome::fail(error),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ActionExecutor for CountingExecutor {
        async fn execute(
            &self,
            _user_id: &str,
            _plugin: &str,
            _action: &str,
            _params: &Value,
        ) -> Result<ActionOutcome, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }
    }

    fn governor_with(
        script: Vec<ModelResponse>,
        executor: CountingExecutor,
        config: GovernorConfig,
    ) -> ExecutionGovernor<CountingExecutor> {
        ExecutionGovernor::new(
            BoxModelClient::new(ScriptedModel::new(script)),
            executor,
            "test-model".to_string(),
            config,
        )
    }

    async fn run(governor: &ExecutionGovernor<CountingExecutor>) -> ExecutionReport {
        governor
            .run(
                "user-1",
                "You are a workflow agent.",
                "Do the thing.",
                vec![],
                &CancellationToken::new(),
            )
            .await
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn completes_when_no_tool_calls() {
        let governor = governor_with(
            vec![text_response("All done.", 100)],
            CountingExecutor::succeeding(json!({})),
            GovernorConfig::default(),
        );
        let report = run(&governor).await;
        assert!(report.success);
        assert_eq!(report.outcome, GovernorOutcome::Completed);
        assert_eq!(report.response, "All done.");
        assert_eq!(report.iterations, 1);
        assert!(report.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn executes_tools_then_completes() {
        let governor = governor_with(
            vec![
                tool_response("google-mail.search_emails", 100),
                text_response("Found 2 emails.", 100),
            ],
            CountingExecutor::succeeding(json!({"emails": ["a", "b"]})),
            GovernorConfig::default(),
        );
        let report = run(&governor).await;
        assert!(report.success);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.tool_calls.len(), 1);
        assert_eq!(report.tool_calls[0].plugin, "google-mail");
        assert_eq!(report.tool_calls[0].action, "search_emails");
        assert!(report.tool_calls[0].success);
    }

    // -----------------------------------------------------------------------
    // Scenario: always-failing tool runs out the iteration cap
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn always_failing_tool_hits_max_iterations_exactly() {
        // Alternate two signatures so loop detection stays quiet and the
        // iteration cap is what terminates the run.
        let config = GovernorConfig {
            max_iterations: 4,
            ..GovernorConfig::default()
        };
        let governor = governor_with(
            vec![
                tool_response("a.x", 50),
                tool_response("b.y", 50),
                tool_response("a.x", 50),
                tool_response("b.y", 50),
            ],
            CountingExecutor::failing("permission denied"),
            config,
        );
        let report = run(&governor).await;
        assert_eq!(report.outcome, GovernorOutcome::MaxIterationsReached);
        assert!(!report.success);
        assert_eq!(report.iterations, 4, "runs exactly max_iterations times");
        assert_eq!(report.tool_calls.len(), 4, "one record per tool-call turn");
        assert!(report.tool_calls.iter().all(|c| !c.success));
        assert!(report.outcome.is_recoverable());
    }

    #[tokio::test]
    async fn tool_failure_is_surfaced_not_thrown() {
        let governor = governor_with(
            vec![
                tool_response("a.x", 50),
                text_response("Adapted to the failure.", 50),
            ],
            CountingExecutor::failing("quota exceeded"),
            GovernorConfig::default(),
        );
        let report = run(&governor).await;
        // The run still completes; the failure was recorded and fed back.
        assert_eq!(report.outcome, GovernorOutcome::Completed);
        assert_eq!(report.tool_calls.len(), 1);
        assert!(!report.tool_calls[0].success);
        let recorded = report.tool_calls[0].result.to_string();
        assert!(recorded.contains("quota exceeded"));
    }

    // -----------------------------------------------------------------------
    // Loop detection
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn three_identical_signatures_trip_loop_detection() {
        let executor = CountingExecutor::failing("never works");
        let governor = ExecutionGovernor::new(
            BoxModelClient::new(ScriptedModel::new(vec![tool_response("a.x", 50)])),
            executor,
            "test-model".to_string(),
            GovernorConfig::default(),
        );
        let report = run(&governor).await;
        assert_eq!(report.outcome, GovernorOutcome::LoopDetected);
        assert!(report.outcome.is_fatal());
        // The third identical call trips the window; a fourth is never issued.
        assert_eq!(report.tool_calls.len(), 3);
        assert_eq!(governor.executor.call_count(), 3);
        assert!(report.error.unwrap().contains("a.x"));
    }

    #[tokio::test]
    async fn alternating_signatures_do_not_trip() {
        let config = GovernorConfig {
            max_iterations: 3,
            ..GovernorConfig::default()
        };
        let governor = governor_with(
            vec![
                tool_response("a.x", 50),
                tool_response("b.y", 50),
                tool_response("a.x", 50),
            ],
            CountingExecutor::succeeding(json!({})),
            config,
        );
        let report = run(&governor).await;
        assert_eq!(report.outcome, GovernorOutcome::MaxIterationsReached);
        assert_eq!(report.tool_calls.len(), 3);
    }

    // -----------------------------------------------------------------------
    // Token budgets
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn per_iteration_cap_trips_on_first_iteration() {
        let config = GovernorConfig {
            max_tokens_per_iteration: 500,
            ..GovernorConfig::default()
        };
        let governor = governor_with(
            vec![text_response("big", 5_000)],
            CountingExecutor::succeeding(json!({})),
            config,
        );
        let report = run(&governor).await;
        assert_eq!(report.outcome, GovernorOutcome::TokenLimitExceeded);
        assert!(report.outcome.is_fatal());
        assert_eq!(report.iterations, 1);
        // Totals still report what was spent.
        assert_eq!(report.tokens_used.total, 5_010);
    }

    #[tokio::test]
    async fn cumulative_cap_trips_circuit_breaker() {
        // Each iteration uses ~1010 tokens; cap of 2500 trips on the third.
        let config = GovernorConfig {
            max_total_tokens: 2_500,
            max_iterations: 10,
            ..GovernorConfig::default()
        };
        let governor = governor_with(
            vec![
                tool_response("a.x", 1000),
                tool_response("b.y", 1000),
                tool_response("a.x", 1000),
            ],
            CountingExecutor::succeeding(json!({})),
            config,
        );
        let report = run(&governor).await;
        assert_eq!(report.outcome, GovernorOutcome::CircuitBreakerTripped);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.tokens_used.total, 3_060, "totals sum across iterations");
    }

    // -----------------------------------------------------------------------
    // Truncation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn oversized_tool_results_are_truncated_in_records() {
        let config = GovernorConfig {
            tool_result_char_limit: 200,
            ..GovernorConfig::default()
        };
        let rows: Vec<String> = (0..100).map(|i| format!("row {i}")).collect();
        let governor = governor_with(
            vec![tool_response("a.x", 50), text_response("done", 50)],
            CountingExecutor::succeeding(json!({"rows": rows})),
            config,
        );
        let report = run(&governor).await;
        let recorded = report.tool_calls[0].result.as_str().unwrap();
        assert!(recorded.contains("[truncated: original"));
        assert!(recorded.contains("100 items"));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancelled_token_stops_the_run() {
        let governor = governor_with(
            vec![tool_response("a.x", 50)],
            CountingExecutor::succeeding(json!({})),
            GovernorConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel();
        let report = governor
            .run("user-1", "sys", "msg", vec![], &token)
            .await;
        assert_eq!(report.outcome, GovernorOutcome::Failed);
        assert!(report.error.unwrap().contains("cancelled"));
        assert_eq!(governor.executor.call_count(), 0);
    }
}
