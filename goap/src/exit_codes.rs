//! Stable exit codes for `goap` CLI commands.

use crate::error::Signal;

/// Command succeeded (plan found, run completed).
pub const OK: i32 = 0;
/// Invalid config, catalog, arguments or other errors.
pub const INVALID: i32 = 1;
/// No plan reaches the goal within the search bounds.
pub const NO_PLAN: i32 = 2;
/// The daily budget is exhausted or cannot cover the plan.
pub const BUDGET: i32 = 3;
/// An action failed or its preconditions no longer held at run time.
pub const FAILED: i32 = 4;

/// Exit code for a run or plan stopped by `signal`.
pub fn for_signal(signal: &Signal) -> i32 {
    match signal {
        Signal::NoPlanFound { .. } => NO_PLAN,
        _ if signal.is_budget() => BUDGET,
        _ => FAILED,
    }
}
