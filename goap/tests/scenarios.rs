//! End-to-end planner, ledger and executor scenarios.
//!
//! Each test builds a catalog in memory, plans against a ledger on a manual
//! clock, and checks the plan, the execution result and the ledger together.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use goap::core::action::{Action, Catalog};
use goap::core::planner::Planner;
use goap::core::types::{BudgetStatus, SpendRecord};
use goap::core::world::{Condition, Effect, Fact, WorldState};
use goap::error::Signal;
use goap::execute::{ExecuteOptions, execute};
use goap::io::clock::{Clock, ManualClock};
use goap::ledger::BudgetLedger;
use goap::test_support::{FailingExecutor, ScriptedExecutor, ledger_at, state};

fn verify_claim_catalog() -> Catalog {
    Catalog::from_actions([Action::new("verify_claim", "verification")
        .produces(Effect::set("verified", true))
        .costing(0.01, 300)])
    .expect("catalog")
}

fn outreach_catalog() -> Catalog {
    Catalog::from_actions([
        Action::new("draft_outreach", "writing")
            .requires(Condition::equals("researched", true))
            .produces(Effect::set("drafted", true))
            .costing(0.02, 800),
        Action::new("research_topic", "research")
            .produces(Effect::set("researched", true))
            .costing(0.05, 2_000),
        Action::new("heartbeat", "ops")
            .produces(Effect::set("alive", true))
            .costing(0.0, 0),
    ])
    .expect("catalog")
}

fn spend(ledger: &BudgetLedger, cost: f64) {
    ledger
        .record_spend(SpendRecord::new(
            ledger.now(),
            "anthropic",
            "large",
            "research",
            cost,
        ))
        .expect("spend");
}

#[test]
fn single_action_plan_for_verification() {
    let ledger = ledger_at(1.0);
    let catalog = verify_claim_catalog();
    let goal = state([("verified", Fact::Bool(true))]);

    let plan = Planner::default()
        .plan(&WorldState::new(), &goal, &catalog, &ledger.status())
        .expect("plan");
    assert_eq!(plan.action_names(), vec!["verify_claim"]);
    assert_eq!(plan.total_estimated_cost_usd, 0.01);
    assert!(plan.can_afford);

    // Exactly one cent left is still enough.
    spend(&ledger, 0.99);
    assert!(plan.affordable_under(&ledger.status()));
}

#[test]
fn refuses_plan_that_exceeds_remaining_budget() {
    let ledger = ledger_at(1.0);
    spend(&ledger, 0.99);
    let executor = Arc::new(ScriptedExecutor::costing(0.02));
    let catalog = Catalog::from_actions([Action::new("verify_claim", "verification")
        .produces(Effect::set("verified", true))
        .costing(0.02, 300)
        .executed_by(executor.clone())])
    .expect("catalog");
    let goal = state([("verified", Fact::Bool(true))]);

    let plan = Planner::default()
        .plan(&WorldState::new(), &goal, &catalog, &ledger.status())
        .expect("plan");
    assert!(!plan.can_afford);

    let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
    assert!(!run.success);
    assert!(matches!(
        run.failure,
        Some(Signal::InsufficientBudgetForPlan { .. })
    ));
    assert!(run.outputs.is_empty());
    assert_eq!(executor.calls(), 0);
    assert_eq!(ledger.status().call_count, 1);
}

#[test]
fn research_is_planned_before_drafting() {
    let ledger = ledger_at(5.0);
    let goal = state([("drafted", Fact::Bool(true))]);
    let plan = Planner::default()
        .plan(&WorldState::new(), &goal, &outreach_catalog(), &ledger.status())
        .expect("plan");
    assert_eq!(plan.action_names(), vec!["research_topic", "draft_outreach"]);
    assert_eq!(plan.total_estimated_tokens, 2_800);
}

#[test]
fn failure_mid_plan_keeps_completed_work() {
    let ledger = ledger_at(5.0);
    let catalog = Catalog::from_actions([
        Action::new("research_topic", "research")
            .produces(Effect::set("researched", true))
            .costing(0.05, 0)
            .executed_by(Arc::new(ScriptedExecutor::costing(0.04))),
        Action::new("draft_outreach", "writing")
            .requires(Condition::equals("researched", true))
            .produces(Effect::set("drafted", true))
            .costing(0.02, 0)
            .executed_by(Arc::new(FailingExecutor::new("model refused"))),
        Action::new("verify_claim", "verification")
            .requires(Condition::equals("drafted", true))
            .produces(Effect::set("verified", true))
            .costing(0.01, 0),
    ])
    .expect("catalog");
    let goal = state([("verified", Fact::Bool(true))]);
    let plan = Planner::default()
        .plan(&WorldState::new(), &goal, &catalog, &ledger.status())
        .expect("plan");
    assert_eq!(plan.actions.len(), 3);

    let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
    assert!(!run.success);
    assert_eq!(run.final_state, state([("researched", Fact::Bool(true))]));
    let names: Vec<&str> = run.outputs.iter().map(|o| o.action.as_str()).collect();
    assert_eq!(names, vec!["research_topic"]);
    assert_eq!(run.actual_cost_usd, 0.04);

    let Some(Signal::ActionExecutionFailed { step, action, .. }) = &run.failure else {
        panic!("expected execution failure, got {:?}", run.failure);
    };
    assert_eq!(*step, 2);
    assert_eq!(action, "draft_outreach");
    assert_eq!(ledger.status().call_count, 1);
}

#[test]
fn exactly_one_reset_across_midnight() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 14, 23, 59, 59).unwrap(),
    ));
    let ledger = BudgetLedger::with_clock(1_000.0, 100, clock.clone());
    spend(&ledger, 5.0);
    let yesterday = clock.today();
    let tomorrow = yesterday.succ_opt().expect("next day");

    const THREADS: usize = 16;
    let barrier = Barrier::new(THREADS + 1);
    let per_thread: Vec<Vec<BudgetStatus>> = thread::scope(|scope| {
        let spenders: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    // Spend until this thread lands in the new day, then once more.
                    let mut seen = Vec::new();
                    loop {
                        let status = ledger
                            .record_spend(SpendRecord::new(
                                ledger.now(),
                                "openai",
                                "small",
                                "ops",
                                0.25,
                            ))
                            .expect("spend");
                        let crossed = status.last_reset == tomorrow;
                        seen.push(status);
                        if crossed {
                            break;
                        }
                    }
                    seen.push(
                        ledger
                            .record_spend(SpendRecord::new(
                                ledger.now(),
                                "openai",
                                "small",
                                "ops",
                                0.25,
                            ))
                            .expect("spend"),
                    );
                    seen
                })
            })
            .collect();

        // Midnight passes while the spenders are running.
        barrier.wait();
        while ledger.status().call_count < 1 + THREADS as u64 {
            thread::yield_now();
        }
        clock.advance(Duration::seconds(2));

        spenders
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    for seen in &per_thread {
        // Once a thread observes the new day it never sees the old one again.
        let first_new = seen
            .iter()
            .position(|s| s.last_reset == tomorrow)
            .expect("crossed midnight");
        assert!(seen[..first_new].iter().all(|s| s.last_reset == yesterday));
        assert!(seen[first_new..].iter().all(|s| s.last_reset == tomorrow));
    }

    let all: Vec<&BudgetStatus> = per_thread.iter().flatten().collect();
    let mut before: Vec<u64> = all
        .iter()
        .filter(|s| s.last_reset == yesterday)
        .map(|s| s.call_count)
        .collect();
    let mut after: Vec<u64> = all
        .iter()
        .filter(|s| s.last_reset == tomorrow)
        .map(|s| s.call_count)
        .collect();
    assert!(before.len() >= THREADS);
    assert_eq!(after.len(), 2 * THREADS);

    // One reset: post-midnight call counts run 1..=n with no repeats.
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, (2..=before.len() as u64 + 1).collect::<Vec<_>>());
    assert_eq!(after, (1..=after.len() as u64).collect::<Vec<_>>());

    let status = ledger.status();
    assert_eq!(status.last_reset, tomorrow);
    assert_eq!(status.call_count, after.len() as u64);
    assert_eq!(status.daily_spend_usd, after.len() as f64 * 0.25);
    assert_eq!(ledger.spend_by_provider().get("anthropic"), None);
    assert_eq!(
        ledger.spend_by_task().get("ops"),
        Some(&(after.len() as f64 * 0.25))
    );
}

#[test]
fn concurrent_spend_is_never_lost() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;
    let ledger = ledger_at(1_000.0);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..PER_THREAD {
                    spend(&ledger, 0.25);
                }
            });
        }
    });

    let status = ledger.status();
    let total = (THREADS * PER_THREAD) as f64 * 0.25;
    assert_eq!(status.daily_spend_usd, total);
    assert_eq!(status.call_count, (THREADS * PER_THREAD) as u64);
    assert_eq!(ledger.spend_by_task().get("research"), Some(&total));
    assert_eq!(ledger.recent_spend(usize::MAX).len(), 100);
}

#[test]
fn breaker_opens_at_limit_and_closes_next_day() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 14, 9, 0, 0).unwrap(),
    ));
    let ledger = BudgetLedger::with_clock(0.10, 100, clock.clone());
    let catalog = verify_claim_catalog();
    let goal = state([("verified", Fact::Bool(true))]);

    spend(&ledger, 0.10);
    let status = ledger.status();
    assert!(status.is_blocked);
    assert_eq!(status.remaining_usd, 0.0);

    let plan = Planner::default()
        .plan(&WorldState::new(), &goal, &catalog, &status)
        .expect("plan");
    let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
    assert_eq!(
        run.failure.as_ref().map(Signal::code),
        Some("BudgetExhausted")
    );

    clock.advance(Duration::days(1));
    let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
    assert!(run.success);
    assert_eq!(run.final_state, goal);
}

#[test]
fn execution_is_deterministic() {
    let goal = state([("drafted", Fact::Bool(true))]);
    let runs: Vec<_> = (0..2)
        .map(|_| {
            let ledger = ledger_at(5.0);
            let plan = Planner::default()
                .plan(&WorldState::new(), &goal, &outreach_catalog(), &ledger.status())
                .expect("plan");
            let run = execute(&plan, &WorldState::new(), &ledger, &ExecuteOptions::default());
            (run, ledger.snapshot())
        })
        .collect();
    assert_eq!(runs[0], runs[1]);
    assert!(runs[0].0.success);
}
