//! Planner configuration and action catalog stored in `goap.toml`.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::action::{Action, Catalog};
use crate::core::planner::PlannerOptions;
use crate::core::world::{Condition, Effect};
use crate::execute::ExecuteOptions;
use crate::io::command::CommandExecutor;
use crate::ledger::DEFAULT_RECENT_CAPACITY;

/// Top-level configuration (TOML).
///
/// Missing sections and fields fall back to defaults, so an empty file is a
/// valid config with an empty catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GoapConfig {
    pub planner: PlannerOptions,
    pub budget: BudgetConfig,
    pub executor: ExecutorConfig,
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_limit_usd: f64,
    /// Spend records kept in the recent buffer.
    pub recent_capacity: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 10.0,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-action wall-clock limit in seconds.
    pub action_timeout_secs: u64,
    /// Whole-plan wall-clock limit in seconds; 0 disables it.
    pub plan_timeout_secs: u64,
    /// Bytes of command stdout/stderr kept per action.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 120,
            plan_timeout_secs: 0,
            output_limit_bytes: 100_000,
        }
    }
}

/// One catalog entry. Without `command` the action runs as a dry run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionConfig {
    pub name: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub estimated_cost_usd: f64,
    #[serde(default)]
    pub estimated_tokens: u64,
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl GoapConfig {
    /// Default settings with a one-action catalog to start from.
    pub fn starter() -> Self {
        Self {
            actions: vec![ActionConfig {
                name: "verify_claim".to_string(),
                task_type: "verification".to_string(),
                estimated_cost_usd: 0.01,
                estimated_tokens: 300,
                preconditions: Vec::new(),
                effects: vec![Effect::set("verified", true)],
                command: None,
            }],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.planner.max_depth == 0 {
            return Err(anyhow!("planner.max_depth must be > 0"));
        }
        if self.planner.max_expansions == 0 {
            return Err(anyhow!("planner.max_expansions must be > 0"));
        }
        if !self.budget.daily_limit_usd.is_finite() || self.budget.daily_limit_usd < 0.0 {
            return Err(anyhow!("budget.daily_limit_usd must be finite and >= 0"));
        }
        if self.budget.recent_capacity == 0 {
            return Err(anyhow!("budget.recent_capacity must be > 0"));
        }
        if self.executor.action_timeout_secs == 0 {
            return Err(anyhow!("executor.action_timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        for action in &self.actions {
            if let Some(command) = &action.command
                && command.first().is_none_or(|p| p.trim().is_empty())
            {
                return Err(anyhow!(
                    "actions.{}.command must be a non-empty array",
                    action.name
                ));
            }
        }
        Ok(())
    }

    /// Build the catalog in file order. Catalog invariants are checked here.
    pub fn build_catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        for entry in &self.actions {
            let mut action = Action::new(&entry.name, &entry.task_type)
                .costing(entry.estimated_cost_usd, entry.estimated_tokens);
            action.preconditions = entry.preconditions.clone();
            action.effects = entry.effects.clone();
            if let Some(command) = &entry.command {
                let executor = CommandExecutor::new(
                    command.clone(),
                    Duration::from_secs(self.executor.action_timeout_secs),
                    self.executor.output_limit_bytes,
                )?;
                action = action.executed_by(Arc::new(executor));
            }
            catalog.register(action)?;
        }
        debug!(actions = catalog.len(), "catalog built");
        Ok(catalog)
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        let plan_timeout = match self.executor.plan_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        ExecuteOptions {
            action_timeout: Some(Duration::from_secs(self.executor.action_timeout_secs)),
            plan_timeout,
        }
    }
}

/// Write the starter config to `path` if missing (or always with `force`).
///
/// Returns whether the file was written.
pub fn init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        debug!(path = %path.display(), "config exists, leaving it");
        return Ok(false);
    }
    write_config(path, &GoapConfig::starter())?;
    Ok(true)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GoapConfig::default()`.
pub fn load_config(path: &Path) -> Result<GoapConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = GoapConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GoapConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GoapConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::world::Fact;

    const SAMPLE: &str = r#"
[budget]
daily_limit_usd = 2.5

[[actions]]
name = "research_topic"
task_type = "research"
estimated_cost_usd = 0.05
effects = [{ op = "set", key = "researched", value = true }]

[[actions]]
name = "draft_outreach"
task_type = "writing"
estimated_cost_usd = 0.02
preconditions = [{ op = "equals", key = "researched", value = true }]
effects = [{ op = "set", key = "drafted", value = true }]
command = ["sh", "-c", "cat"]
"#;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GoapConfig::default());
        assert!(cfg.build_catalog().expect("catalog").is_empty());
    }

    #[test]
    fn parses_sections_and_actions() {
        let cfg: GoapConfig = toml::from_str(SAMPLE).expect("parse");
        cfg.validate().expect("valid");
        assert_eq!(cfg.budget.daily_limit_usd, 2.5);
        assert_eq!(cfg.budget.recent_capacity, DEFAULT_RECENT_CAPACITY);
        assert_eq!(cfg.planner, PlannerOptions::default());
        assert_eq!(cfg.actions.len(), 2);
        assert_eq!(
            cfg.actions[1].preconditions,
            vec![Condition::equals("researched", Fact::Bool(true))]
        );

        let catalog = cfg.build_catalog().expect("catalog");
        let names: Vec<&str> = catalog.actions().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["research_topic", "draft_outreach"]);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("goap.toml");
        let cfg: GoapConfig = toml::from_str(SAMPLE).expect("parse");
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn invalid_catalog_fails_to_build() {
        let cfg: GoapConfig = toml::from_str(
            r#"
[[actions]]
name = "noop"
task_type = "ops"
"#,
        )
        .expect("parse");
        let err = cfg.build_catalog().unwrap_err();
        assert!(err.to_string().contains("noop"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = GoapConfig::default();
        cfg.budget.daily_limit_usd = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = GoapConfig::default();
        cfg.executor.action_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg: GoapConfig = toml::from_str(SAMPLE).expect("parse");
        cfg.actions[1].command = Some(Vec::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn plan_timeout_zero_means_none() {
        let mut cfg = GoapConfig::default();
        let options = cfg.execute_options();
        assert_eq!(options.action_timeout, Some(Duration::from_secs(120)));
        assert_eq!(options.plan_timeout, None);

        cfg.executor.plan_timeout_secs = 30;
        assert_eq!(
            cfg.execute_options().plan_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn init_writes_starter_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("goap.toml");
        assert!(init_config(&path, false).expect("init"));
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, GoapConfig::starter());
        assert_eq!(loaded.build_catalog().expect("catalog").len(), 1);

        fs::write(&path, SAMPLE).expect("overwrite");
        assert!(!init_config(&path, false).expect("init"));
        assert_eq!(load_config(&path).expect("load").actions.len(), 2);

        assert!(init_config(&path, true).expect("init"));
        assert_eq!(load_config(&path).expect("load"), GoapConfig::starter());
    }
}
