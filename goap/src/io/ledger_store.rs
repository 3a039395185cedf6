//! Ledger snapshot storage between CLI invocations.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::clock::Clock;
use crate::io::config::BudgetConfig;
use crate::ledger::{BudgetLedger, LedgerSnapshot};

/// Load a ledger snapshot from disk.
pub fn load_snapshot(path: &Path) -> Result<LedgerSnapshot> {
    debug!(path = %path.display(), "loading ledger snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    let snapshot: LedgerSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("parse ledger {}", path.display()))?;
    snapshot
        .validate()
        .with_context(|| format!("invalid ledger {}", path.display()))?;
    debug!(
        spent_usd = snapshot.daily_spend_usd,
        last_reset = %snapshot.last_reset,
        "ledger snapshot loaded"
    );
    Ok(snapshot)
}

/// Atomically write a ledger snapshot to disk (temp file + rename).
pub fn write_snapshot(path: &Path, snapshot: &LedgerSnapshot) -> Result<()> {
    debug!(path = %path.display(), spent_usd = snapshot.daily_spend_usd, "writing ledger snapshot");
    let mut buf = serde_json::to_string_pretty(snapshot)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Restore the ledger at `path`, or start a fresh one when the file is missing.
///
/// The configured limit always wins over the limit stored in the snapshot.
pub fn open_ledger(
    path: &Path,
    budget: &BudgetConfig,
    clock: Arc<dyn Clock>,
) -> Result<BudgetLedger> {
    if !path.exists() {
        return Ok(BudgetLedger::with_clock(
            budget.daily_limit_usd,
            budget.recent_capacity,
            clock,
        ));
    }
    let snapshot = load_snapshot(path)?;
    let ledger = BudgetLedger::from_snapshot(snapshot, budget.recent_capacity, clock)?;
    ledger.set_daily_limit(budget.daily_limit_usd)?;
    Ok(ledger)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("ledger path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp ledger {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace ledger {}", path.display()))?;
    Ok(())
}
