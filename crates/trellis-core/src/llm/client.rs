//! ModelClient trait definition.
//!
//! This is the core abstraction over reasoning-model backends. Uses native
//! async fn in traits (RPITIT); `BoxModelClient` provides the object-safe
//! wrapper for runtime dispatch (the pipeline holds separate "design" and
//! "repair" clients chosen at construction time).

use trellis_types::llm::{CompletionRequest, LlmError, ModelResponse};

/// Trait for reasoning-model backends.
///
/// The pipeline relies on constrained/structured output: when
/// `CompletionRequest::output_config` is set, the client must return
/// content conforming to the schema (or fail with a typed error). Clients
/// that cannot enforce the constraint server-side may still return their
/// best-effort JSON; the caller falls back to fenced-JSON extraction.
pub trait ModelClient: Send + Sync {
    /// Human-readable client name (e.g. "anthropic", "mock").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<ModelResponse, LlmError>> + Send;
}
