//! Daily spend ledger and circuit breaker.
//!
//! One [`BudgetLedger`] is created at startup and shared by handle; clones
//! point at the same state. All state lives behind a single mutex: the clock
//! is read and the daily rollover check runs inside that lock, so the reset
//! happens exactly once per UTC day no matter how many callers observe the
//! date change at the same time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::types::{BudgetStatus, SpendRecord};
use crate::io::clock::{Clock, SystemClock};

pub const DEFAULT_RECENT_CAPACITY: usize = 1000;

/// Persistable copy of the ledger's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub daily_spend_usd: f64,
    pub daily_limit_usd: f64,
    pub call_count: u64,
    pub last_reset: NaiveDate,
    #[serde(default)]
    pub spend_by_provider: BTreeMap<String, f64>,
    #[serde(default)]
    pub spend_by_task: BTreeMap<String, f64>,
    #[serde(default)]
    pub recent: Vec<SpendRecord>,
}

impl LedgerSnapshot {
    /// Every amount must be finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        check_amount("daily_spend_usd", self.daily_spend_usd)?;
        check_amount("daily_limit_usd", self.daily_limit_usd)?;
        for (provider, cost) in &self.spend_by_provider {
            check_amount(&format!("spend_by_provider.{provider}"), *cost)?;
        }
        for (task, cost) in &self.spend_by_task {
            check_amount(&format!("spend_by_task.{task}"), *cost)?;
        }
        for (i, record) in self.recent.iter().enumerate() {
            check_amount(&format!("recent[{i}].cost_usd"), record.cost_usd)?;
        }
        Ok(())
    }
}

fn check_amount(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("{field} must be finite and >= 0 (got {value})");
    }
    Ok(())
}

#[derive(Debug)]
struct LedgerState {
    daily_spend_usd: f64,
    daily_limit_usd: f64,
    call_count: u64,
    last_reset: NaiveDate,
    by_provider: BTreeMap<String, f64>,
    by_task: BTreeMap<String, f64>,
    recent: VecDeque<SpendRecord>,
}

impl LedgerState {
    /// Reset daily counters if `today` is past `last_reset`. A clock running
    /// backwards never moves `last_reset` back.
    fn roll_over(&mut self, today: NaiveDate) {
        if today <= self.last_reset {
            return;
        }
        info!(
            previous = %self.last_reset,
            today = %today,
            spent_usd = self.daily_spend_usd,
            calls = self.call_count,
            "daily budget reset"
        );
        self.daily_spend_usd = 0.0;
        self.call_count = 0;
        self.by_provider.clear();
        self.by_task.clear();
        self.last_reset = today;
    }

    fn status(&self) -> BudgetStatus {
        BudgetStatus::new(
            self.daily_spend_usd,
            self.daily_limit_usd,
            self.call_count,
            self.last_reset,
        )
    }
}

struct Shared {
    state: Mutex<LedgerState>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct BudgetLedger {
    shared: Arc<Shared>,
}

impl BudgetLedger {
    /// Ledger on the system clock.
    pub fn new(daily_limit_usd: f64, capacity: usize) -> Self {
        Self::with_clock(daily_limit_usd, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(daily_limit_usd: f64, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        Self::from_state(
            LedgerState {
                daily_spend_usd: 0.0,
                daily_limit_usd,
                call_count: 0,
                last_reset: today,
                by_provider: BTreeMap::new(),
                by_task: BTreeMap::new(),
                recent: VecDeque::new(),
            },
            capacity,
            clock,
        )
    }

    /// Restore a ledger. The rollover check runs on first access, so a
    /// snapshot from an earlier day starts clean.
    pub fn from_snapshot(
        snapshot: LedgerSnapshot,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        snapshot.validate()?;
        let capacity = capacity.max(1);
        let skip = snapshot.recent.len().saturating_sub(capacity);
        Ok(Self::from_state(
            LedgerState {
                daily_spend_usd: snapshot.daily_spend_usd,
                daily_limit_usd: snapshot.daily_limit_usd,
                call_count: snapshot.call_count,
                last_reset: snapshot.last_reset,
                by_provider: snapshot.spend_by_provider,
                by_task: snapshot.spend_by_task,
                recent: snapshot.recent.into_iter().skip(skip).collect(),
            },
            capacity,
            clock,
        ))
    }

    fn from_state(state: LedgerState, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                capacity: capacity.max(1),
                clock,
            }),
        }
    }

    /// Lock the state and roll it over to the clock's current date.
    fn lock_today(&self) -> MutexGuard<'_, LedgerState> {
        let mut state = self.shared.state.lock();
        state.roll_over(self.shared.clock.today());
        state
    }

    /// Current time on the ledger's clock, for stamping spend records.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// Record spend: rollover, add cost, count the call, append to the
    /// bounded buffer, recompute status. One critical section.
    ///
    /// A negative or non-finite cost is rejected and leaves the ledger as is.
    pub fn record_spend(&self, record: SpendRecord) -> Result<BudgetStatus> {
        if let Err(err) = check_amount("cost_usd", record.cost_usd) {
            warn!(
                provider = %record.provider,
                task_type = %record.task_type,
                cost_usd = record.cost_usd,
                "spend rejected"
            );
            return Err(err);
        }
        let mut state = self.lock_today();

        let was_blocked = state.status().is_blocked;
        state.daily_spend_usd += record.cost_usd;
        state.call_count += 1;
        *state
            .by_provider
            .entry(record.provider.clone())
            .or_insert(0.0) += record.cost_usd;
        *state.by_task.entry(record.task_type.clone()).or_insert(0.0) += record.cost_usd;
        if state.recent.len() >= self.shared.capacity {
            state.recent.pop_front();
        }
        debug!(
            provider = %record.provider,
            task_type = %record.task_type,
            cost_usd = record.cost_usd,
            "spend recorded"
        );
        state.recent.push_back(record);

        let status = state.status();
        if status.is_blocked && !was_blocked {
            warn!(
                spent_usd = status.daily_spend_usd,
                limit_usd = status.daily_limit_usd,
                "daily budget exhausted, circuit breaker open"
            );
        }
        Ok(status)
    }

    pub fn status(&self) -> BudgetStatus {
        self.lock_today().status()
    }

    /// Change the daily limit; blocking is re-derived immediately.
    pub fn set_daily_limit(&self, daily_limit_usd: f64) -> Result<BudgetStatus> {
        check_amount("daily limit", daily_limit_usd)?;
        let mut state = self.lock_today();
        state.daily_limit_usd = daily_limit_usd;
        let status = state.status();
        info!(
            limit_usd = daily_limit_usd,
            blocked = status.is_blocked,
            "daily limit updated"
        );
        Ok(status)
    }

    /// Today's spend per provider.
    pub fn spend_by_provider(&self) -> BTreeMap<String, f64> {
        self.lock_today().by_provider.clone()
    }

    /// Today's spend per task type.
    pub fn spend_by_task(&self) -> BTreeMap<String, f64> {
        self.lock_today().by_task.clone()
    }

    /// Up to `n` most recent records, oldest first.
    pub fn recent_spend(&self, n: usize) -> Vec<SpendRecord> {
        let state = self.shared.state.lock();
        let skip = state.recent.len().saturating_sub(n);
        state.recent.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock_today();
        LedgerSnapshot {
            daily_spend_usd: state.daily_spend_usd,
            daily_limit_usd: state.daily_limit_usd,
            call_count: state.call_count,
            last_reset: state.last_reset,
            spend_by_provider: state.by_provider.clone(),
            spend_by_task: state.by_task.clone(),
            recent: state.recent.iter().cloned().collect(),
        }
    }
}
