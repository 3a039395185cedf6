//! Conditions signaled at the planner/executor boundary.
//!
//! None of these are bugs: each is a recoverable outcome the surrounding
//! system maps to its own status codes via [`Signal::code`].

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "signal")]
pub enum Signal {
    #[error("no plan reaches the goal within {max_depth} actions")]
    NoPlanFound { max_depth: usize },

    #[error("daily budget exhausted: spent ${spent_usd:.4} of ${limit_usd:.4}")]
    BudgetExhausted { spent_usd: f64, limit_usd: f64 },

    #[error("plan needs ${required_usd:.4} but only ${remaining_usd:.4} remains today")]
    InsufficientBudgetForPlan {
        required_usd: f64,
        remaining_usd: f64,
    },

    #[error("step {step} ({action}): preconditions no longer hold: {}", .unmet.join(", "))]
    PreconditionViolatedAtRuntime {
        step: usize,
        action: String,
        unmet: Vec<String>,
    },

    #[error("step {step} ({action}) failed: {reason}")]
    ActionExecutionFailed {
        step: usize,
        action: String,
        reason: String,
    },
}

impl Signal {
    /// Stable identifier for status-code mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Signal::NoPlanFound { .. } => "NoPlanFound",
            Signal::BudgetExhausted { .. } => "BudgetExhausted",
            Signal::InsufficientBudgetForPlan { .. } => "InsufficientBudgetForPlan",
            Signal::PreconditionViolatedAtRuntime { .. } => "PreconditionViolatedAtRuntime",
            Signal::ActionExecutionFailed { .. } => "ActionExecutionFailed",
        }
    }

    /// Budget signals clear after the daily reset or a limit increase.
    pub fn is_budget(&self) -> bool {
        matches!(
            self,
            Signal::BudgetExhausted { .. } | Signal::InsufficientBudgetForPlan { .. }
        )
    }
}
