//! Cumulative token budget for governed runs.
//!
//! `RunBudget` provides atomic token counting against the configured total
//! cap. It detects the 80% warning crossing exactly once and reports
//! exhaustion, which the engine treats as the circuit breaker tripping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Status returned after adding tokens to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Under the warning threshold (< 80%).
    Ok,
    /// Just crossed the 80% threshold. Returned exactly once per budget.
    Warning,
    /// At or over 100% of the budget.
    Exhausted,
}

/// Atomic cumulative token tracker.
///
/// Cloning produces a shared view of the same budget, so concurrent tool
/// dispatch within one turn still counts against a single ceiling.
#[derive(Debug, Clone)]
pub struct RunBudget {
    total_budget: u64,
    tokens_used: Arc<AtomicU64>,
    warning_emitted: Arc<AtomicBool>,
}

impl RunBudget {
    /// Create a new budget with the given total token cap.
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            tokens_used: Arc::new(AtomicU64::new(0)),
            warning_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Atomically add tokens and return the resulting status.
    pub fn add_tokens(&self, tokens: u64) -> BudgetStatus {
        let prev = self.tokens_used.fetch_add(tokens, Ordering::SeqCst);
        let new_total = prev.saturating_add(tokens);

        if new_total >= self.total_budget {
            return BudgetStatus::Exhausted;
        }

        let threshold = self.total_budget * 80 / 100;
        if prev < threshold
            && new_total >= threshold
            && self
                .warning_emitted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return BudgetStatus::Warning;
        }

        BudgetStatus::Ok
    }

    /// Current number of tokens consumed.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::SeqCst)
    }

    /// The total budget cap.
    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    /// Remaining tokens before exhaustion (saturating).
    pub fn remaining(&self) -> u64 {
        self.total_budget
            .saturating_sub(self.tokens_used.load(Ordering::SeqCst))
    }
}
