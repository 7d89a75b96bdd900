//! Execution governor: drives one LLM tool-calling conversation to a
//! terminal state while enforcing iteration caps, per-call and cumulative
//! token budgets, and repeated-tool-call (loop) detection.

pub mod budget;
pub mod engine;
pub mod truncate;
pub mod window;

pub use budget::{BudgetStatus, RunBudget};
pub use engine::ExecutionGovernor;
pub use truncate::truncate_tool_result;
pub use window::SignatureWindow;
