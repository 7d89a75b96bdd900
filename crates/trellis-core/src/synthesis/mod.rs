//! Workflow synthesis: Stage 1 (model-designed structure), Stage 2
//! (deterministic completion), and the pipeline orchestrator that runs the
//! stages, the validation gates, and the repair loop in order.

pub mod completer;
pub mod designer;
pub mod pipeline;
pub mod prompt;
pub mod walk;

pub use completer::complete;
pub use designer::{DesignError, WorkflowDesigner};
pub use pipeline::SynthesisPipeline;
