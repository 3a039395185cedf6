//! Budget-gated, strictly sequential plan execution.
//!
//! Each action's executor runs on a worker thread and is awaited with a
//! timeout before the next action is considered. Failures stop the run and
//! return whatever was completed: effects already applied stay applied and
//! spend already recorded stays recorded.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::action::{Action, ActionOutcome, ActionRequest};
use crate::core::budget::remaining_budget;
use crate::core::planner::Plan;
use crate::core::types::SpendRecord;
use crate::core::world::{WorldState, apply_effects, unmet};
use crate::error::Signal;
use crate::ledger::BudgetLedger;

/// Provider attributed to spend when the executor reports no usage.
pub const DEFAULT_PROVIDER: &str = "internal";

/// Wall-clock limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteOptions {
    pub action_timeout: Option<Duration>,
    pub plan_timeout: Option<Duration>,
}

/// Output of one completed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutput {
    pub action: String,
    pub output: Value,
    pub actual_cost_usd: f64,
}

/// Result of [`execute`]. A failed run is still a valid, inspectable outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub success: bool,
    pub final_state: WorldState,
    pub outputs: Vec<ActionOutput>,
    pub actual_cost_usd: f64,
    pub failure: Option<Signal>,
}

impl Execution {
    fn start(current: &WorldState) -> Self {
        Self {
            success: false,
            final_state: current.clone(),
            outputs: Vec::new(),
            actual_cost_usd: 0.0,
            failure: None,
        }
    }

    fn halt(mut self, signal: Signal) -> Self {
        warn!(signal = signal.code(), %signal, "execution halted");
        self.success = false;
        self.failure = Some(signal);
        self
    }
}

/// Run `plan` from `current`, recording real spend into `ledger`.
///
/// Refuses up front when the circuit breaker is open or the plan no longer
/// fits in today's remaining budget. Never panics on executor failure.
#[instrument(skip_all, fields(actions = plan.actions.len(), estimated_usd = plan.total_estimated_cost_usd))]
pub fn execute(
    plan: &Plan,
    current: &WorldState,
    ledger: &BudgetLedger,
    options: &ExecuteOptions,
) -> Execution {
    let run = Execution::start(current);

    let status = ledger.status();
    if status.is_blocked {
        return run.halt(Signal::BudgetExhausted {
            spent_usd: status.daily_spend_usd,
            limit_usd: status.daily_limit_usd,
        });
    }
    if !plan.affordable_under(&status) {
        return run.halt(Signal::InsufficientBudgetForPlan {
            required_usd: plan.total_estimated_cost_usd,
            remaining_usd: status.remaining_usd,
        });
    }

    let deadline = options.plan_timeout.map(|timeout| Instant::now() + timeout);
    run_actions(plan, run, ledger, options, deadline)
}

fn run_actions(
    plan: &Plan,
    mut run: Execution,
    ledger: &BudgetLedger,
    options: &ExecuteOptions,
    deadline: Option<Instant>,
) -> Execution {
    for (index, action) in plan.actions.iter().enumerate() {
        let step = index + 1;
        let failed = |reason: String| Signal::ActionExecutionFailed {
            step,
            action: action.name.clone(),
            reason,
        };

        // Another plan may have drained the budget since the previous step.
        let status = ledger.status();
        if status.is_blocked {
            return run.halt(Signal::BudgetExhausted {
                spent_usd: status.daily_spend_usd,
                limit_usd: status.daily_limit_usd,
            });
        }

        let missing = unmet(&run.final_state, &action.preconditions);
        if !missing.is_empty() {
            return run.halt(Signal::PreconditionViolatedAtRuntime {
                step,
                action: action.name.clone(),
                unmet: missing.iter().map(ToString::to_string).collect(),
            });
        }

        let timeout = match step_timeout(options.action_timeout, deadline) {
            Ok(timeout) => timeout,
            Err(err) => return run.halt(failed(err.to_string())),
        };

        debug!(step, action = %action.name, "running action");
        let request = ActionRequest {
            action: action.name.clone(),
            task_type: action.task_type.clone(),
            estimated_cost_usd: action.estimated_cost_usd,
            state: run.final_state.clone(),
        };
        let outcome = match invoke(action, request, timeout, ledger) {
            Ok(outcome) => outcome,
            Err(err) => return run.halt(failed(format!("{err:#}"))),
        };

        if let Err(err) = ledger.record_spend(spend_record(action, &outcome, ledger)) {
            return run.halt(failed(format!("reported invalid cost: {err}")));
        }
        let cost = outcome.actual_cost_usd;
        run.actual_cost_usd += cost;

        if !outcome.effects_confirmed {
            return run.halt(failed("effects not confirmed".to_string()));
        }

        run.final_state = apply_effects(&run.final_state, &action.effects);
        run.outputs.push(ActionOutput {
            action: action.name.clone(),
            output: outcome.output,
            actual_cost_usd: cost,
        });
        info!(step, action = %action.name, cost_usd = cost, "action completed");
    }

    run.success = true;
    run
}

/// The tighter of the per-action timeout and what is left of the plan budget.
fn step_timeout(
    action_timeout: Option<Duration>,
    deadline: Option<Instant>,
) -> Result<Option<Duration>> {
    let remaining = deadline.map(remaining_budget).transpose()?;
    Ok(match (action_timeout, remaining) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    })
}

/// Run the executor on a worker thread and wait for it.
///
/// A timed-out worker is abandoned but keeps a ledger handle, so spend it
/// reports after the step has failed is still recorded. A panicking executor
/// drops its sender, which surfaces here as an error.
fn invoke(
    action: &Arc<Action>,
    request: ActionRequest,
    timeout: Option<Duration>,
    ledger: &BudgetLedger,
) -> Result<ActionOutcome> {
    let worker_action = Arc::clone(action);
    let worker_ledger = ledger.clone();
    let abandoned = Arc::new(Mutex::new(false));
    let worker_abandoned = Arc::clone(&abandoned);
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("action-{}", action.name))
        .spawn(move || {
            let result = worker_action.executor.run(&request);
            // Send under the lock so the waiter cannot give up mid-handoff.
            let abandoned = worker_abandoned.lock();
            if *abandoned {
                drop(abandoned);
                record_late(&worker_action, result, &worker_ledger);
            } else {
                let _ = tx.send(result);
            }
        })
        .context("spawn action worker")?;

    let Some(timeout) = timeout else {
        return rx.recv().map_err(|_| anyhow!("executor panicked"))?;
    };
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            let mut abandoned = abandoned.lock();
            if let Ok(result) = rx.try_recv() {
                return result;
            }
            *abandoned = true;
            Err(anyhow!("timed out after {timeout:?}"))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("executor panicked")),
    }
}

/// Record what an abandoned worker reports once it finishes.
fn record_late(action: &Action, result: Result<ActionOutcome>, ledger: &BudgetLedger) {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(action = %action.name, error = %format!("{err:#}"), "abandoned action failed");
            return;
        }
    };
    match ledger.record_spend(spend_record(action, &outcome, ledger)) {
        Ok(status) => warn!(
            action = %action.name,
            cost_usd = outcome.actual_cost_usd,
            spent_usd = status.daily_spend_usd,
            "spend recorded after timeout"
        ),
        Err(err) => warn!(action = %action.name, error = %err, "late spend rejected"),
    }
}

fn spend_record(action: &Action, outcome: &ActionOutcome, ledger: &BudgetLedger) -> SpendRecord {
    let usage = outcome.usage.clone().unwrap_or_default();
    SpendRecord {
        timestamp: ledger.now(),
        provider: usage
            .provider
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
        model: usage.model.unwrap_or_else(|| action.name.clone()),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cost_usd: outcome.actual_cost_usd,
        task_type: action.task_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::{Catalog, Usage};
    use crate::core::planner::Planner;
    use crate::core::world::{Condition, Effect, Fact};
    use crate::test_support::{FailingExecutor, ScriptedExecutor, SlowExecutor, ledger_at};
    use serde_json::json;

    fn single_action_plan(action: Action, ledger: &BudgetLedger) -> (Catalog, Plan) {
        let target = action.effects[0].clone();
        let catalog = Catalog::from_actions([action]).expect("catalog");
        let Effect::Set { key, value } = target else {
            panic!("expected set effect");
        };
        let goal = WorldState::from([(key, value)]);
        let plan = Planner::default()
            .plan(&WorldState::new(), &goal, &catalog, &ledger.status())
            .expect("plan");
        (catalog, plan)
    }

    #[test]
    fn records_spend_with_usage_attribution() {
        let ledger = ledger_at(5.0);
        let executor = ScriptedExecutor::new(
            ActionOutcome::new(json!({"summary": "ok"}), 0.02).with_usage(Usage {
                provider: Some("anthropic".to_string()),
                model: Some("large".to_string()),
                input_tokens: 120,
                output_tokens: 40,
            }),
        );
        let action = Action::new("research_topic", "research")
            .produces(Effect::set("researched", true))
            .costing(0.03, 160)
            .executed_by(Arc::new(executor));
        let (_catalog, plan) = single_action_plan(action, &ledger);

        let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
        assert!(run.success);
        assert_eq!(run.actual_cost_usd, 0.02);
        assert_eq!(run.final_state.get("researched"), Some(&Fact::Bool(true)));

        let records = ledger.recent_spend(1);
        assert_eq!(records[0].provider, "anthropic");
        assert_eq!(records[0].model, "large");
        assert_eq!(records[0].input_tokens, 120);
        assert_eq!(records[0].task_type, "research");
    }

    #[test]
    fn defaults_attribution_without_usage() {
        let ledger = ledger_at(5.0);
        let action = Action::new("heartbeat", "ops")
            .produces(Effect::set("alive", true))
            .costing(0.001, 0);
        let (_catalog, plan) = single_action_plan(action, &ledger);

        let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
        assert!(run.success);
        let records = ledger.recent_spend(1);
        assert_eq!(records[0].provider, DEFAULT_PROVIDER);
        assert_eq!(records[0].model, "heartbeat");
    }

    #[test]
    fn refuses_when_breaker_is_open() {
        let ledger = ledger_at(1.0);
        let action = Action::new("verify_claim", "verification")
            .produces(Effect::set("verified", true))
            .costing(0.01, 0);
        let (_catalog, plan) = single_action_plan(action, &ledger);
        ledger
            .record_spend(SpendRecord::new(ledger.now(), "p", "m", "t", 1.0))
            .expect("spend");

        let current = WorldState::from([("seen".to_string(), Fact::Bool(true))]);
        let run = execute(&plan, &current, &ledger, &ExecuteOptions::default());
        assert!(!run.success);
        assert_eq!(run.final_state, current);
        assert!(run.outputs.is_empty());
        assert_eq!(run.actual_cost_usd, 0.0);
        assert_eq!(run.failure.as_ref().map(Signal::code), Some("BudgetExhausted"));
    }

    #[test]
    fn runtime_precondition_violation_stops_the_run() {
        let ledger = ledger_at(5.0);
        let catalog = Catalog::from_actions([
            Action::new("research_topic", "research").produces(Effect::set("researched", true)),
            Action::new("draft_outreach", "writing")
                .requires(Condition::equals("researched", true))
                .produces(Effect::set("drafted", true)),
        ])
        .expect("catalog");
        let goal = WorldState::from([("drafted".to_string(), Fact::Bool(true))]);
        let plan = Planner::default()
            .plan(&WorldState::new(), &goal, &catalog, &ledger.status())
            .expect("plan");

        // Drop the first action so the second starts from a state it was not planned for.
        let mut shifted = plan.clone();
        shifted.actions.remove(0);
        let run = execute(&shifted, &WorldState::new(), &ledger, &ExecuteOptions::default());
        assert!(!run.success);
        assert_eq!(
            run.failure,
            Some(Signal::PreconditionViolatedAtRuntime {
                step: 1,
                action: "draft_outreach".to_string(),
                unmet: vec!["researched == true".to_string()],
            })
        );
        assert_eq!(ledger.status().call_count, 0);
    }

    #[test]
    fn executor_error_becomes_a_signal() {
        let ledger = ledger_at(5.0);
        let action = Action::new("verify_claim", "verification")
            .produces(Effect::set("verified", true))
            .executed_by(Arc::new(FailingExecutor::new("upstream 503")));
        let (_catalog, plan) = single_action_plan(action, &ledger);

        let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
        let Some(Signal::ActionExecutionFailed { step, reason, .. }) = run.failure else {
            panic!("expected execution failure, got {:?}", run.failure);
        };
        assert_eq!(step, 1);
        assert!(reason.contains("upstream 503"));
        assert!(run.final_state.is_empty());
    }

    #[test]
    fn panicking_executor_is_contained() {
        let ledger = ledger_at(5.0);
        let action = Action::new("architect_solution", "design")
            .produces(Effect::set("architected", true))
            .executed_by(Arc::new(|_: &ActionRequest| -> Result<ActionOutcome> {
                panic!("boom")
            }));
        let (_catalog, plan) = single_action_plan(action, &ledger);

        let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
        let Some(Signal::ActionExecutionFailed { reason, .. }) = run.failure else {
            panic!("expected execution failure");
        };
        assert!(reason.contains("panicked"));
    }

    #[test]
    fn timeout_is_an_execution_failure() {
        let ledger = ledger_at(5.0);
        let action = Action::new("research_topic", "research")
            .produces(Effect::set("researched", true))
            .executed_by(Arc::new(SlowExecutor::new(Duration::from_secs(2))));
        let (_catalog, plan) = single_action_plan(action, &ledger);
        let options = ExecuteOptions {
            action_timeout: Some(Duration::from_millis(50)),
            plan_timeout: None,
        };

        let run = execute(&plan, &WorldState::new(), &ledger, &options);
        let Some(Signal::ActionExecutionFailed { reason, .. }) = run.failure else {
            panic!("expected execution failure");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(ledger.status().call_count, 0);
    }

    #[test]
    fn spend_reported_after_timeout_reaches_the_ledger() {
        let ledger = ledger_at(5.0);
        let action = Action::new("research_topic", "research")
            .produces(Effect::set("researched", true))
            .executed_by(Arc::new(SlowExecutor::costing(
                Duration::from_millis(200),
                0.75,
            )));
        let (_catalog, plan) = single_action_plan(action, &ledger);
        let options = ExecuteOptions {
            action_timeout: Some(Duration::from_millis(50)),
            plan_timeout: None,
        };

        let run = execute(&plan, &WorldState::new(), &ledger, &options);
        assert_eq!(
            run.failure.as_ref().map(Signal::code),
            Some("ActionExecutionFailed")
        );
        assert_eq!(run.actual_cost_usd, 0.0);
        assert!(run.final_state.is_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        while ledger.status().call_count == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let status = ledger.status();
        assert_eq!(status.call_count, 1);
        assert_eq!(status.daily_spend_usd, 0.75);
        assert_eq!(ledger.spend_by_task().get("research"), Some(&0.75));
    }

    #[test]
    fn invalid_reported_cost_halts_without_recording() {
        let ledger = ledger_at(5.0);
        let action = Action::new("verify_claim", "verification")
            .produces(Effect::set("verified", true))
            .executed_by(Arc::new(ScriptedExecutor::costing(-0.5)));
        let (_catalog, plan) = single_action_plan(action, &ledger);

        let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
        let Some(Signal::ActionExecutionFailed { reason, .. }) = run.failure else {
            panic!("expected execution failure");
        };
        assert!(reason.contains("invalid cost"));
        assert_eq!(ledger.status().call_count, 0);
        assert_eq!(run.actual_cost_usd, 0.0);
    }

    #[test]
    fn unconfirmed_effects_halt_after_recording_spend() {
        let ledger = ledger_at(5.0);
        let executor = ScriptedExecutor::new(ActionOutcome::new(json!(null), 0.04).unconfirmed());
        let action = Action::new("verify_claim", "verification")
            .produces(Effect::set("verified", true))
            .executed_by(Arc::new(executor));
        let (_catalog, plan) = single_action_plan(action, &ledger);

        let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
        assert!(!run.success);
        assert!(run.final_state.is_empty());
        assert!(run.outputs.is_empty());
        assert_eq!(run.actual_cost_usd, 0.04);
        assert_eq!(ledger.status().daily_spend_usd, 0.04);
    }

    #[test]
    fn step_timeout_takes_the_tighter_bound() {
        let far = Instant::now() + Duration::from_secs(60);
        let got = step_timeout(Some(Duration::from_secs(1)), Some(far)).expect("timeout");
        assert_eq!(got, Some(Duration::from_secs(1)));
        assert_eq!(step_timeout(None, None).expect("timeout"), None);
        assert!(step_timeout(None, Some(Instant::now())).is_err());
    }
}
