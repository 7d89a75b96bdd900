//! Execution-side types: action outcomes, governor reports, and interpreter
//! run records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::Usage;

// ---------------------------------------------------------------------------
// Action executor contract
// ---------------------------------------------------------------------------

/// Result of one plugin-action execution.
///
/// Expected failure modes are expressed via `success: false` + `error`;
/// the executor never signals them by erroring out of the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Governor report
// ---------------------------------------------------------------------------

/// Record of one tool call made during a governed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub plugin: String,
    pub action: String,
    pub parameters: Value,
    pub result: Value,
    pub success: bool,
}

/// Token totals across a governed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenTotals {
    /// Fold one completion's usage into the totals.
    pub fn add_usage(&mut self, usage: &Usage) {
        self.prompt += u64::from(usage.input_tokens);
        self.completion += u64::from(usage.output_tokens);
        self.total = self.prompt + self.completion;
    }
}

/// Terminal state of a governed conversation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorOutcome {
    /// The model produced a final response with no tool calls.
    Completed,
    /// The iteration cap was reached; the caller may retry with a
    /// narrower request.
    MaxIterationsReached,
    /// A single iteration exceeded the per-iteration token cap.
    TokenLimitExceeded,
    /// Cumulative usage exceeded the total token cap.
    CircuitBreakerTripped,
    /// The same tool signature repeated past the configured window.
    LoopDetected,
    /// The model client failed terminally.
    Failed,
}

impl GovernorOutcome {
    /// Fatal outcomes are intentionally not retried: retrying would
    /// compound the cost or ambiguity that caused the trip.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            GovernorOutcome::TokenLimitExceeded
                | GovernorOutcome::CircuitBreakerTripped
                | GovernorOutcome::LoopDetected
                | GovernorOutcome::Failed
        )
    }

    /// Recoverable-by-retry-elsewhere, distinct from the fatal trips.
    pub fn is_recoverable(self) -> bool {
        matches!(self, GovernorOutcome::MaxIterationsReached)
    }
}

/// Full result of a governed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tokens_used: TokenTotals,
    pub execution_time_ms: u64,
    pub iterations: u32,
    pub outcome: GovernorOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Interpreter run records
// ---------------------------------------------------------------------------

/// Status of one interpreted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Completed,
    Failed,
    Skipped,
}

/// Execution record for one interpreted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_name: String,
    pub status: StepRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal status of an interpreted workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { error: String },
    /// Paused at a human-approval gate; resumable by the caller.
    AwaitingApproval { step_id: String, prompt: String },
    Cancelled,
}

/// Per-item outcome of a scatter-gather step. All items are gathered,
/// success or failure; one item's failure never aborts its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full result of an interpreted workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub records: Vec<StepRecord>,
    /// Final step outputs keyed by step id.
    pub outputs: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
