//! Test-only helpers: deterministic clocks, ledgers, states and executors.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::core::action::{ActionExecutor, ActionOutcome, ActionRequest};
use crate::core::world::{Fact, WorldState};
use crate::io::clock::ManualClock;
use crate::ledger::BudgetLedger;

/// Midday UTC, far from the date boundary.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 14, 12, 0, 0)
        .single()
        .expect("valid fixed time")
}

pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(fixed_time()))
}

/// Ledger with `daily_limit_usd` on a fresh fixed clock.
pub fn ledger_at(daily_limit_usd: f64) -> BudgetLedger {
    BudgetLedger::with_clock(daily_limit_usd, 100, fixed_clock())
}

/// Build a world state from key/value pairs.
pub fn state<const N: usize>(pairs: [(&str, Fact); N]) -> WorldState {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Write `contents` to `goap.toml` under `dir` and return its path.
pub fn write_config_file(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("goap.toml");
    fs::write(&path, contents).expect("write config");
    path
}

/// Temp directory holding a `goap.toml` with `contents`.
pub fn config_dir(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_config_file(temp.path(), contents);
    (temp, path)
}

/// Returns the same outcome on every call and counts calls.
#[derive(Debug)]
pub struct ScriptedExecutor {
    outcome: ActionOutcome,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    /// Reports `cost` with a fixed `{"ok": true}` output.
    pub fn costing(cost: f64) -> Self {
        Self::new(ActionOutcome::new(json!({ "ok": true }), cost))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ActionExecutor for ScriptedExecutor {
    fn run(&self, _request: &ActionRequest) -> Result<ActionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Always fails with the given message.
#[derive(Debug)]
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ActionExecutor for FailingExecutor {
    fn run(&self, _request: &ActionRequest) -> Result<ActionOutcome> {
        Err(anyhow!("{}", self.message))
    }
}

/// Sleeps before succeeding with a fixed cost.
#[derive(Debug)]
pub struct SlowExecutor {
    delay: Duration,
    cost: f64,
}

impl SlowExecutor {
    /// Succeeds at zero cost after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self::costing(delay, 0.0)
    }

    pub fn costing(delay: Duration, cost: f64) -> Self {
        Self { delay, cost }
    }
}

impl ActionExecutor for SlowExecutor {
    fn run(&self, _request: &ActionRequest) -> Result<ActionOutcome> {
        thread::sleep(self.delay);
        Ok(ActionOutcome::new(json!("late"), self.cost))
    }
}
