//! Configuration types for Trellis.
//!
//! Every threshold the pipeline, governor, and interpreter consult is a
//! field here with a serde default: confidence floor, repair bound,
//! loop-window size, token caps, truncation budget, concurrency clamps,
//! and timeouts. Loaded from `trellis.toml`; all sections optional.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration, usually loaded from `trellis.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrellisConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(String),
}

impl TrellisConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; a malformed file is an error.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Tuning for the synthesis pipeline (stages, gates, repair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Gate 3 warns when designer confidence falls below this floor.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Repair attempts per failing step before giving up.
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,

    /// Deadline for each model-backed stage (design, repair), in seconds.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Max tokens requested per designer/repair completion.
    #[serde(default = "default_design_max_tokens")]
    pub design_max_tokens: u32,
}

fn default_confidence_floor() -> f64 {
    0.5
}

fn default_max_repair_attempts() -> u32 {
    3
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_design_max_tokens() -> u32 {
    8192
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            max_repair_attempts: default_max_repair_attempts(),
            stage_timeout_secs: default_stage_timeout_secs(),
            design_max_tokens: default_design_max_tokens(),
        }
    }
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

/// Tuning for the execution governor's conversation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Maximum conversation iterations before `MaxIterationsReached`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per-iteration token cap; breach is fatal (`TokenLimitExceeded`).
    #[serde(default = "default_max_tokens_per_iteration")]
    pub max_tokens_per_iteration: u64,

    /// Cumulative token cap; breach is fatal (`CircuitBreakerTripped`).
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: u64,

    /// Size of the identical-signature window that trips `LoopDetected`.
    #[serde(default = "default_loop_window")]
    pub loop_window: usize,

    /// Character budget per tool result before truncation.
    #[serde(default = "default_tool_result_char_limit")]
    pub tool_result_char_limit: usize,

    /// Timeout for each tool execution, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Timeout for each model completion, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Max tokens requested per completion.
    #[serde(default = "default_completion_max_tokens")]
    pub completion_max_tokens: u32,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_tokens_per_iteration() -> u64 {
    32_000
}

fn default_max_total_tokens() -> u64 {
    200_000
}

fn default_loop_window() -> usize {
    3
}

fn default_tool_result_char_limit() -> usize {
    16_000
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_completion_max_tokens() -> u32 {
    4096
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens_per_iteration: default_max_tokens_per_iteration(),
            max_total_tokens: default_max_total_tokens(),
            loop_window: default_loop_window(),
            tool_result_char_limit: default_tool_result_char_limit(),
            tool_timeout_secs: default_tool_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            completion_max_tokens: default_completion_max_tokens(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner (DAG interpreter)
// ---------------------------------------------------------------------------

/// Tuning for the DAG interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Iteration cap applied to loop steps lacking `maxIterations`.
    #[serde(default = "default_loop_iterations")]
    pub default_loop_iterations: u32,

    /// Upper clamp on scatter-gather `maxConcurrency` (spec range 1-10).
    #[serde(default = "default_max_concurrency_limit")]
    pub max_concurrency_limit: u32,

    /// Per-step execution timeout, in seconds.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Maximum sub-workflow nesting depth.
    #[serde(default = "default_max_sub_workflow_depth")]
    pub max_sub_workflow_depth: u32,

    /// Upper clamp on delay steps, in milliseconds.
    #[serde(default = "default_delay_cap_ms")]
    pub delay_cap_ms: u64,

    /// Max tokens requested per `ai_processing` completion.
    #[serde(default = "default_ai_max_tokens")]
    pub ai_max_tokens: u32,
}

fn default_loop_iterations() -> u32 {
    25
}

fn default_max_concurrency_limit() -> u32 {
    10
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_sub_workflow_depth() -> u32 {
    5
}

fn default_delay_cap_ms() -> u64 {
    60_000
}

fn default_ai_max_tokens() -> u32 {
    4096
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_loop_iterations: default_loop_iterations(),
            max_concurrency_limit: default_max_concurrency_limit(),
            step_timeout_secs: default_step_timeout_secs(),
            max_sub_workflow_depth: default_max_sub_workflow_depth(),
            delay_cap_ms: default_delay_cap_ms(),
            ai_max_tokens: default_ai_max_tokens(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
