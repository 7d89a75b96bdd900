//! ActionExecutor port: the seam to the external plugin runtime.
//!
//! The core never implements plugin actions; it calls whatever executor
//! the host injects. Expected failures come back as
//! `ActionOutcome { success: false, .. }`; an `Err` from the call is an
//! unexpected fault, which the governor and interpreter catch and convert
//! to a structured failure rather than propagating.

use serde_json::Value;

use trellis_types::execution::ActionOutcome;

/// Errors an executor may raise for unexpected faults (transport failures,
/// panics in plugin glue). Expected failure modes belong in
/// `ActionOutcome`, not here.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor fault: {0}")]
    Fault(String),
}

/// Trait for the external action executor.
pub trait ActionExecutor: Send + Sync {
    /// Execute one plugin action on behalf of a user.
    fn execute(
        &self,
        user_id: &str,
        plugin: &str,
        action: &str,
        params: &Value,
    ) -> impl std::future::Future<Output = Result<ActionOutcome, ExecutorError>> + Send;
}
