//! Actions, their executor seam, and the registration-ordered catalog.
//!
//! The [`ActionExecutor`] trait decouples planning from whatever real work an
//! action performs. Tests plug in scripted executors; the CLI plugs in
//! command-backed or dry-run executors.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::invariants::validate_action;
use crate::core::world::{Condition, Effect, WorldState};

/// Input handed to an executor when its action runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRequest {
    pub action: String,
    pub task_type: String,
    pub estimated_cost_usd: f64,
    /// Working state immediately before this action.
    pub state: WorldState,
}

/// Provider/model attribution for the spend an action incurred.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What an executor reports after doing its work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    #[serde(default)]
    pub output: Value,
    pub actual_cost_usd: f64,
    /// False when the executor could not confirm the declared effects took place.
    #[serde(default = "confirmed")]
    pub effects_confirmed: bool,
    #[serde(default)]
    pub usage: Option<Usage>,
}

fn confirmed() -> bool {
    true
}

impl ActionOutcome {
    pub fn new(output: Value, actual_cost_usd: f64) -> Self {
        Self {
            output,
            actual_cost_usd,
            effects_confirmed: true,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn unconfirmed(mut self) -> Self {
        self.effects_confirmed = false;
        self
    }
}

/// Abstraction over the real side effect behind an action.
///
/// Executors may block; the executor loop runs each call on a worker thread
/// and waits for it with a timeout.
pub trait ActionExecutor: Send + Sync {
    fn run(&self, request: &ActionRequest) -> Result<ActionOutcome>;
}

impl<F> ActionExecutor for F
where
    F: Fn(&ActionRequest) -> Result<ActionOutcome> + Send + Sync,
{
    fn run(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        self(request)
    }
}

/// Executor with no side effect that reports the estimated cost as spent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

impl ActionExecutor for DryRunExecutor {
    fn run(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        Ok(ActionOutcome::new(
            json!({ "dry_run": true, "action": request.action }),
            request.estimated_cost_usd,
        ))
    }
}

/// A named, costed operation with declared preconditions and effects.
#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub task_type: String,
    pub preconditions: Vec<Condition>,
    pub effects: Vec<Effect>,
    pub estimated_cost_usd: f64,
    pub estimated_tokens: u64,
    pub executor: Arc<dyn ActionExecutor>,
}

impl Action {
    /// New action with no conditions, no effects, zero cost and a dry-run executor.
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            preconditions: Vec::new(),
            effects: Vec::new(),
            estimated_cost_usd: 0.0,
            estimated_tokens: 0,
            executor: Arc::new(DryRunExecutor),
        }
    }

    pub fn requires(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    pub fn produces(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn costing(mut self, estimated_cost_usd: f64, estimated_tokens: u64) -> Self {
        self.estimated_cost_usd = estimated_cost_usd;
        self.estimated_tokens = estimated_tokens;
        self
    }

    pub fn executed_by(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("task_type", &self.task_type)
            .field("preconditions", &self.preconditions)
            .field("effects", &self.effects)
            .field("estimated_cost_usd", &self.estimated_cost_usd)
            .field("estimated_tokens", &self.estimated_tokens)
            .finish_non_exhaustive()
    }
}

/// Registration-ordered set of actions.
///
/// Order matters: the planner breaks cost ties in favor of the action
/// registered first. Once built, share the catalog immutably (e.g. behind an
/// `Arc`); nothing in this crate mutates a catalog after registration.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    actions: Vec<Arc<Action>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from actions in registration order.
    pub fn from_actions(actions: impl IntoIterator<Item = Action>) -> Result<Self> {
        let mut catalog = Self::new();
        for action in actions {
            catalog.register(action)?;
        }
        Ok(catalog)
    }

    /// Validate and append an action.
    pub fn register(&mut self, action: Action) -> Result<()> {
        let errors = validate_action(&action, &self.actions);
        if !errors.is_empty() {
            bail!(
                "invalid action '{}':\n- {}",
                action.name,
                errors.join("\n- ")
            );
        }
        self.actions.push(Arc::new(action));
        Ok(())
    }

    pub fn actions(&self) -> &[Arc<Action>] {
        &self.actions
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Action>> {
        self.actions.iter().find(|action| action.name == name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
