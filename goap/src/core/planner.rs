//! Bounded goal-regression planner.
//!
//! Works backward from the goal: each search node is the set of requirements
//! that must hold before the plan suffix chosen so far. Nodes are expanded
//! cheapest first (uniform-cost search on an explicit heap), so the first node
//! whose requirements the current state already satisfies yields a
//! lowest-cost plan. Equal costs prefer actions registered earlier.
//!
//! The search is pure: no I/O, no shared state, and the catalog is only
//! borrowed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::core::action::{Action, Catalog};
use crate::core::budget::{can_afford, to_micros};
use crate::core::regression::{
    Requirement, all_hold, canonicalize, fingerprint, is_inconsistent, is_superset, regress_set,
};
use crate::core::types::BudgetStatus;
use crate::core::world::{Condition, WorldState, apply_effects, goal_conditions, matches};
use crate::error::Signal;

/// Search bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Longest plan (in actions) the search will consider.
    pub max_depth: usize,
    /// Node expansions after which the search gives up.
    pub max_expansions: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_expansions: 50_000,
        }
    }
}

/// An ordered, costed action sequence for one goal.
#[derive(Debug, Clone)]
pub struct Plan {
    pub goal: WorldState,
    pub actions: Vec<Arc<Action>>,
    pub total_estimated_cost_usd: f64,
    pub total_estimated_tokens: u64,
    /// Affordability at plan time. Use [`Plan::affordable_under`] for a fresh answer.
    pub can_afford: bool,
}

/// Serializable view of a [`Plan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub goal: WorldState,
    pub actions: Vec<String>,
    pub total_estimated_cost_usd: f64,
    pub total_estimated_tokens: u64,
    pub can_afford: bool,
}

impl Plan {
    fn new(goal: WorldState, actions: Vec<Arc<Action>>, status: &BudgetStatus) -> Self {
        let total_estimated_cost_usd = actions
            .iter()
            .fold(0.0, |total, a| total + a.estimated_cost_usd);
        let total_estimated_tokens = actions.iter().map(|a| a.estimated_tokens).sum();
        let mut plan = Self {
            goal,
            actions,
            total_estimated_cost_usd,
            total_estimated_tokens,
            can_afford: false,
        };
        plan.can_afford = plan.affordable_under(status);
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }

    /// Recompute affordability against `status`.
    pub fn affordable_under(&self, status: &BudgetStatus) -> bool {
        can_afford(status, self.total_estimated_cost_usd)
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            goal: self.goal.clone(),
            actions: self.action_names().into_iter().map(String::from).collect(),
            total_estimated_cost_usd: self.total_estimated_cost_usd,
            total_estimated_tokens: self.total_estimated_tokens,
            can_afford: self.can_afford,
        }
    }
}

/// Planner configured with search bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    options: PlannerOptions,
}

impl Planner {
    pub fn new(options: PlannerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> PlannerOptions {
        self.options
    }

    /// Plan from `current` to a state matching every key/value in `goal`.
    ///
    /// `status` is only used to fill in [`Plan::can_afford`].
    pub fn plan(
        &self,
        current: &WorldState,
        goal: &WorldState,
        catalog: &Catalog,
        status: &BudgetStatus,
    ) -> Result<Plan, Signal> {
        let conditions = goal_conditions(goal);
        let indices = search(current, &conditions, catalog, &self.options).ok_or(
            Signal::NoPlanFound {
                max_depth: self.options.max_depth,
            },
        )?;
        let actions = indices
            .into_iter()
            .map(|i| Arc::clone(&catalog.actions()[i]))
            .collect();
        Ok(Plan::new(goal.clone(), actions, status))
    }
}

struct SearchNode {
    open: Vec<Requirement>,
    parent: Option<usize>,
    /// Catalog index of the action that regressed the parent into this node.
    action: Option<usize>,
    depth: usize,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Frontier {
    cost_micros: i64,
    /// Catalog indices from the goal backwards; lexicographic order is the tie-break.
    path: Vec<usize>,
    node: usize,
}

/// Find the cheapest action sequence (as catalog indices, in execution order)
/// that takes `current` to a state satisfying `goal`.
///
/// Returns `Some(vec![])` when the goal already holds and `None` when no
/// sequence of at most `max_depth` actions works.
#[instrument(skip_all, fields(goal = goal.len(), catalog = catalog.len(), max_depth = options.max_depth))]
pub fn search(
    current: &WorldState,
    goal: &[Condition],
    catalog: &Catalog,
    options: &PlannerOptions,
) -> Option<Vec<usize>> {
    // Already-satisfied goal conditions stay in the set so later actions
    // cannot undo them.
    let root = canonicalize(goal.iter().cloned().map(Requirement::plain).collect());
    if all_hold(&root, current) {
        debug!("goal already satisfied");
        return Some(Vec::new());
    }
    if is_inconsistent(&root) {
        debug!("goal is self-contradictory");
        return None;
    }

    let actions = catalog.actions();
    let mut nodes = vec![SearchNode {
        open: root,
        parent: None,
        action: None,
        depth: 0,
    }];
    let mut heap = BinaryHeap::new();
    heap.push(Reverse(Frontier {
        cost_micros: 0,
        path: Vec::new(),
        node: 0,
    }));
    // Fingerprint -> shallowest depth at which that set was expanded.
    let mut expanded: HashMap<String, usize> = HashMap::new();
    let mut expansions = 0usize;

    while let Some(Reverse(entry)) = heap.pop() {
        let node = &nodes[entry.node];
        if all_hold(&node.open, current) {
            let plan = reconstruct(&nodes, entry.node);
            debug!(
                expansions,
                actions = plan.len(),
                cost_micros = entry.cost_micros,
                "plan found"
            );
            return verify(current, goal, actions, plan);
        }
        if node.depth >= options.max_depth {
            continue;
        }
        let key = fingerprint(&node.open);
        if expanded.get(&key).is_some_and(|depth| *depth <= node.depth) {
            continue;
        }
        expanded.insert(key, node.depth);

        expansions += 1;
        if expansions > options.max_expansions {
            warn!(
                max_expansions = options.max_expansions,
                "planner expansion limit reached"
            );
            return None;
        }

        let mut children = Vec::new();
        for (index, action) in actions.iter().enumerate() {
            let Some(open) = regress_set(&nodes[entry.node].open, action) else {
                continue;
            };
            if is_inconsistent(&open) || repeats_ancestor(&nodes, entry.node, &open) {
                continue;
            }
            children.push((index, open));
        }

        let depth = nodes[entry.node].depth + 1;
        for (index, open) in children {
            let mut path = entry.path.clone();
            path.push(index);
            nodes.push(SearchNode {
                open,
                parent: Some(entry.node),
                action: Some(index),
                depth,
            });
            heap.push(Reverse(Frontier {
                cost_micros: entry.cost_micros + to_micros(actions[index].estimated_cost_usd),
                path,
                node: nodes.len() - 1,
            }));
        }
    }

    debug!(expansions, "search space exhausted");
    None
}

/// A set that contains one of its own ancestors can never be cheaper to
/// satisfy than that ancestor: treat it as a cycle.
fn repeats_ancestor(nodes: &[SearchNode], from: usize, open: &[Requirement]) -> bool {
    let mut cursor = Some(from);
    while let Some(index) = cursor {
        if is_superset(open, &nodes[index].open) {
            return true;
        }
        cursor = nodes[index].parent;
    }
    false
}

/// Walk from a solved node back to the root. The node nearest the root holds
/// the last action, so the walk already yields execution order.
fn reconstruct(nodes: &[SearchNode], solved: usize) -> Vec<usize> {
    let mut plan = Vec::new();
    let mut cursor = Some(solved);
    while let Some(index) = cursor {
        if let Some(action) = nodes[index].action {
            plan.push(action);
        }
        cursor = nodes[index].parent;
    }
    plan
}

/// Replay the plan forward; regression guarantees this passes.
fn verify(
    current: &WorldState,
    goal: &[Condition],
    actions: &[Arc<Action>],
    plan: Vec<usize>,
) -> Option<Vec<usize>> {
    let mut state = current.clone();
    for &index in &plan {
        let action = &actions[index];
        if !matches(&state, &action.preconditions) {
            error!(action = %action.name, "regressed plan failed forward replay");
            return None;
        }
        state = apply_effects(&state, &action.effects);
    }
    if !matches(&state, goal) {
        error!("regressed plan does not reach the goal");
        return None;
    }
    Some(plan)
}
