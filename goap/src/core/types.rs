//! Shared deterministic types for planner, ledger and executor.
//!
//! These types define stable contracts between components. They carry no
//! behavior beyond construction and must serialize deterministically.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::budget::{is_blocked, remaining_usd};

/// One unit of real spend reported by an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub task_type: String,
}

impl SpendRecord {
    /// Record with no token usage attached.
    pub fn new(
        timestamp: DateTime<Utc>,
        provider: impl Into<String>,
        model: impl Into<String>,
        task_type: impl Into<String>,
        cost_usd: f64,
    ) -> Self {
        Self {
            timestamp,
            provider: provider.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd,
            task_type: task_type.into(),
        }
    }
}

/// Point-in-time view of the budget ledger.
///
/// `remaining_usd` and `is_blocked` are derived from spend and limit when the
/// snapshot is taken; nothing stores them independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub daily_spend_usd: f64,
    pub daily_limit_usd: f64,
    pub remaining_usd: f64,
    pub is_blocked: bool,
    pub call_count: u64,
    pub last_reset: NaiveDate,
}

impl BudgetStatus {
    pub fn new(
        daily_spend_usd: f64,
        daily_limit_usd: f64,
        call_count: u64,
        last_reset: NaiveDate,
    ) -> Self {
        Self {
            daily_spend_usd,
            daily_limit_usd,
            remaining_usd: remaining_usd(daily_spend_usd, daily_limit_usd),
            is_blocked: is_blocked(daily_spend_usd, daily_limit_usd),
            call_count,
            last_reset,
        }
    }
}
