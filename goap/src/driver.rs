//! Orchestration for `goap` CLI commands.
//!
//! Loads config and catalog, parses caller-supplied states, and ties the
//! planner, ledger and executor together. Everything here returns structured
//! reports; printing and exit codes stay in the binary.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::action::Catalog;
use crate::core::planner::{PlanSummary, Planner};
use crate::core::types::{BudgetStatus, SpendRecord};
use crate::core::world::WorldState;
use crate::error::Signal;
use crate::execute::{Execution, execute};
use crate::io::clock::Clock;
use crate::io::config::{GoapConfig, load_config};
use crate::io::ledger_store::{open_ledger, write_snapshot};
use crate::ledger::BudgetLedger;

/// Records shown by `goap status`.
pub const STATUS_RECENT: usize = 10;

/// Config plus the catalog built from it.
#[derive(Debug)]
pub struct Session {
    pub config: GoapConfig,
    pub catalog: Catalog,
}

/// Outcome of `goap plan`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanReport {
    Found { plan: PlanSummary },
    NoPlan { failure: Signal },
}

/// Outcome of `goap run`. `execution` is absent when no plan was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub plan: Option<PlanSummary>,
    pub execution: Option<Execution>,
    pub budget: BudgetStatus,
    /// The signal that stopped the run, if any.
    pub failure: Option<Signal>,
}

/// Output of `goap status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: BudgetStatus,
    pub spend_by_provider: BTreeMap<String, f64>,
    pub spend_by_task: BTreeMap<String, f64>,
    pub recent: Vec<SpendRecord>,
}

/// Parse a world state from a JSON object such as `{"verified": true}`.
pub fn parse_state(raw: &str) -> Result<WorldState> {
    serde_json::from_str(raw).with_context(|| format!("parse world state {raw}"))
}

impl Session {
    /// Load config at `path` (defaults when missing) and build its catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let config = load_config(path).with_context(|| format!("load {}", path.display()))?;
        let catalog = config.build_catalog().context("build action catalog")?;
        Ok(Self { config, catalog })
    }

    pub fn planner(&self) -> Planner {
        Planner::new(self.config.planner)
    }

    /// Open the ledger at `path`, or a fresh in-memory one.
    pub fn ledger(&self, path: Option<&Path>, clock: Arc<dyn Clock>) -> Result<BudgetLedger> {
        match path {
            Some(path) => open_ledger(path, &self.config.budget, clock),
            None => Ok(BudgetLedger::with_clock(
                self.config.budget.daily_limit_usd,
                self.config.budget.recent_capacity,
                clock,
            )),
        }
    }

    #[instrument(skip_all)]
    pub fn plan(
        &self,
        current: &WorldState,
        goal: &WorldState,
        ledger: &BudgetLedger,
    ) -> PlanReport {
        match self
            .planner()
            .plan(current, goal, &self.catalog, &ledger.status())
        {
            Ok(plan) => PlanReport::Found {
                plan: plan.summary(),
            },
            Err(failure) => PlanReport::NoPlan { failure },
        }
    }

    /// Plan and execute, persisting the ledger to `ledger_path` afterwards.
    #[instrument(skip_all)]
    pub fn run(
        &self,
        current: &WorldState,
        goal: &WorldState,
        ledger_path: Option<&Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<RunReport> {
        let ledger = self.ledger(ledger_path, clock)?;
        let plan = match self
            .planner()
            .plan(current, goal, &self.catalog, &ledger.status())
        {
            Ok(plan) => plan,
            Err(signal) => {
                return Ok(RunReport {
                    plan: None,
                    execution: None,
                    budget: ledger.status(),
                    failure: Some(signal),
                });
            }
        };

        let execution = execute(&plan, current, &ledger, &self.config.execute_options());
        info!(
            success = execution.success,
            actual_usd = execution.actual_cost_usd,
            "run finished"
        );
        if let Some(path) = ledger_path {
            write_snapshot(path, &ledger.snapshot())
                .with_context(|| format!("persist ledger {}", path.display()))?;
        }

        Ok(RunReport {
            plan: Some(plan.summary()),
            failure: execution.failure.clone(),
            execution: Some(execution),
            budget: ledger.status(),
        })
    }

    pub fn status(
        &self,
        ledger_path: Option<&Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<StatusReport> {
        let ledger = self.ledger(ledger_path, clock)?;
        Ok(StatusReport {
            status: ledger.status(),
            spend_by_provider: ledger.spend_by_provider(),
            spend_by_task: ledger.spend_by_task(),
            recent: ledger.recent_spend(STATUS_RECENT),
        })
    }
}
