//! Stage 1: the workflow designer.
//!
//! One structured-output completion against the injected "design" model
//! client produces a `WorkflowDesign`: the step graph, plugin/action
//! choices, and control flow, without guaranteed-complete input schemas
//! (Stage 2 finishes those deterministically).
//!
//! The designer never guesses: a timeout, provider error, or unparseable
//! response fails fast with a typed `DesignError`.

use std::time::Duration;

use tracing::{debug, info};

use trellis_types::catalog::ActionCatalog;
use trellis_types::config::PipelineConfig;
use trellis_types::llm::{ChatMessage, CompletionRequest, OutputConfig, ToolChoice};
use trellis_types::workflow::WorkflowDesign;

use crate::llm::BoxModelClient;

use super::prompt::{design_system_prompt, design_user_prompt};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the design stage. All fatal: there is nothing to repair
/// before Stage 2 has run.
#[derive(Debug, thiserror::Error)]
pub enum DesignError {
    #[error("design model call failed: {0}")]
    Llm(String),

    #[error("design stage timed out after {0}s")]
    Timeout(u64),

    #[error("design response was not a valid workflow design: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// WorkflowDesigner
// ---------------------------------------------------------------------------

/// Stage-1 designer over an injected model client.
pub struct WorkflowDesigner {
    client: BoxModelClient,
    model: String,
    config: PipelineConfig,
}

impl WorkflowDesigner {
    pub fn new(client: BoxModelClient, model: String, config: PipelineConfig) -> Self {
        Self {
            client,
            model,
            config,
        }
    }

    /// Produce a workflow design for a natural-language request.
    pub async fn design(
        &self,
        request: &str,
        catalog: &ActionCatalog,
    ) -> Result<WorkflowDesign, DesignError> {
        let schema = schemars::schema_for!(WorkflowDesign);
        let schema_value = serde_json::to_value(schema)
            .expect("WorkflowDesign schema serialization should not fail");

        let completion_request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(design_user_prompt(request))],
            system: Some(design_system_prompt(catalog)),
            max_tokens: self.config.design_max_tokens,
            temperature: Some(0.2),
            tools: vec![],
            tool_choice: ToolChoice::None,
            stop_sequences: None,
            output_config: Some(OutputConfig::strict_json_schema(
                "WorkflowDesign",
                schema_value,
            )),
        };

        debug!(model = %self.model, "requesting workflow design");
        let response = tokio::time::timeout(
            Duration::from_secs(self.config.stage_timeout_secs),
            self.client.complete(&completion_request),
        )
        .await
        .map_err(|_| DesignError::Timeout(self.config.stage_timeout_secs))?
        .map_err(|e| DesignError::Llm(e.to_string()))?;

        let design = parse_design(&response.content)?;
        info!(
            workflow = %design.name,
            steps = design.steps.len(),
            confidence = design.confidence,
            "stage 1 produced a design"
        );
        Ok(design)
    }
}

/// Parse the design content: strict JSON first, then best-effort
/// extraction of the outermost JSON object (for clients without strict
/// structured output that wrap the payload in prose or fences).
fn parse_design(content: &str) -> Result<WorkflowDesign, DesignError> {
    match serde_json::from_str::<WorkflowDesign>(content) {
        Ok(design) => Ok(design),
        Err(strict_err) => {
            let block = extract_json_object(content).ok_or_else(|| {
                DesignError::Parse(format!("no JSON object in response: {strict_err}"))
            })?;
            serde_json::from_str::<WorkflowDesign>(block)
                .map_err(|e| DesignError::Parse(e.to_string()))
        }
    }
}

/// The outermost `{...}` slice of a text, if any.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use trellis_types::llm::{LlmError, ModelResponse, StopReason, Usage};

    use crate::llm::ModelClient;

    struct StaticModel {
        content: String,
        delay: Option<Duration>,
    }

    impl StaticModel {
        fn returning(content: impl Into<String>) -> Self {
            Self {
                content: content.into(),
                delay: None,
            }
        }
    }

    impl ModelClient for StaticModel {
        fn name(&self) -> &str {
            "static"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<ModelResponse, LlmError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ModelResponse {
                id: "msg_1".to_string(),
                content: self.content.clone(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }
    }

    fn design_json() -> String {
        json!({
            "name": "email-digest",
            "description": "Search and summarize",
            "workflow_type": "automation",
            "steps": [
                {
                    "id": "step1",
                    "name": "Search emails",
                    "type": "action",
                    "plugin": "google-mail",
                    "action": "search_emails",
                    "params": {"query": "is:unread", "max_results": 5},
                    "next": "step2"
                },
                {
                    "id": "step2",
                    "name": "Summarize",
                    "type": "ai_processing",
                    "prompt": "Summarize: {{step1.emails}}"
                }
            ],
            "required_inputs": [],
            "suggested_plugins": ["google-mail"],
            "suggested_outputs": ["summary"],
            "confidence": 0.9,
            "reasoning": "Simple two-step flow"
        })
        .to_string()
    }

    fn designer(client: StaticModel) -> WorkflowDesigner {
        WorkflowDesigner::new(
            BoxModelClient::new(client),
            "test-model".to_string(),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_design_parses_strict_json() {
        let designer = designer(StaticModel::returning(design_json()));
        let design = designer
            .design("Summarize my last 5 emails", &ActionCatalog::default())
            .await
            .unwrap();
        assert_eq!(design.name, "email-digest");
        assert_eq!(design.steps.len(), 2);
        assert!(design.steps[1].is_ai());
    }

    #[tokio::test]
    async fn test_design_falls_back_to_embedded_json() {
        let wrapped = format!("Here is the design:\n```json\n{}\n```\nDone.", design_json());
        let designer = designer(StaticModel::returning(wrapped));
        let design = designer
            .design("Summarize my last 5 emails", &ActionCatalog::default())
            .await
            .unwrap();
        assert_eq!(design.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_design_fails_fast_on_garbage() {
        let designer = designer(StaticModel::returning("I can't help with that."));
        let err = designer
            .design("whatever", &ActionCatalog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DesignError::Parse(_)));
    }

    #[tokio::test]
    async fn test_design_fails_on_schema_mismatch() {
        let designer = designer(StaticModel::returning(r#"{"name": 42}"#));
        let err = designer
            .design("whatever", &ActionCatalog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DesignError::Parse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_design_times_out_with_typed_error() {
        let client = StaticModel {
            content: design_json(),
            delay: Some(Duration::from_secs(600)),
        };
        let designer = designer(client);
        let err = designer
            .design("whatever", &ActionCatalog::default())
            .await
            .unwrap_err();
        match err {
            DesignError::Timeout(secs) => assert_eq!(secs, 120),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("x {\"a\":1} y"), Some("{\"a\":1}"));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }
}
