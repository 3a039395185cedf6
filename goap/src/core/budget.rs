//! Budget arithmetic shared by the planner, ledger and executor.
//!
//! Dollar amounts are compared in whole micro-dollars so that float summation
//! order never flips an affordability decision or a planner tie.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::core::types::BudgetStatus;

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Round a dollar amount to whole micro-dollars.
pub fn to_micros(usd: f64) -> i64 {
    (usd * MICROS_PER_USD).round() as i64
}

/// `limit - spend`, floored at zero.
pub fn remaining_usd(spend_usd: f64, limit_usd: f64) -> f64 {
    (limit_usd - spend_usd).max(0.0)
}

/// The circuit breaker: open once spend reaches the limit.
pub fn is_blocked(spend_usd: f64, limit_usd: f64) -> bool {
    to_micros(spend_usd) >= to_micros(limit_usd)
}

/// Whether a plan costing `cost_usd` fits in `status`.
///
/// Zero-cost plans are always affordable.
pub fn can_afford(status: &BudgetStatus, cost_usd: f64) -> bool {
    if to_micros(cost_usd) <= 0 {
        return true;
    }
    !status.is_blocked && to_micros(status.remaining_usd) >= to_micros(cost_usd)
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("plan timed out"));
    }
    Ok(remaining)
}
