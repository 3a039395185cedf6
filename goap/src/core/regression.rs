//! Goal regression: what must hold *before* an action so that a set of
//! requirements holds *after* it.
//!
//! A [`Requirement`] is a condition on the state at some point in a plan.
//! Regressing through `Increment` cannot be expressed as a plain condition on
//! the prior value (the prior may be missing), so a requirement may carry an
//! accumulated `shift`: it then tests `numeric_or_zero(prior) + shift`.

use std::fmt;

use crate::core::action::Action;
use crate::core::world::{Condition, Effect, Fact, WorldState, numeric_or_zero};

#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub condition: Condition,
    pub shift: Option<f64>,
}

impl Requirement {
    pub fn plain(condition: Condition) -> Self {
        Self {
            condition,
            shift: None,
        }
    }

    pub fn key(&self) -> &str {
        self.condition.key()
    }

    pub fn holds(&self, state: &WorldState) -> bool {
        self.holds_for(state.get(self.key()))
    }

    fn holds_for(&self, value: Option<&Fact>) -> bool {
        match self.shift {
            None => self.condition.holds_for(value),
            Some(shift) => self.holds_numeric(numeric_or_zero(value) + shift),
        }
    }

    /// Evaluate against a value known to be a present number.
    fn holds_numeric(&self, n: f64) -> bool {
        match &self.condition {
            Condition::Equals {
                value: Fact::Number(x),
                ..
            } => n == *x,
            Condition::Equals { .. } => false,
            Condition::NotEquals {
                value: Fact::Number(x),
                ..
            } => n != *x,
            Condition::NotEquals { .. } => true,
            Condition::AtLeast { value, .. } => n >= *value,
            Condition::AtMost { value, .. } => n <= *value,
            Condition::Present { .. } => true,
            Condition::Absent { .. } => false,
        }
    }

    /// For shifted requirements whose outcome no longer depends on the prior value.
    fn constant(&self) -> Option<bool> {
        self.shift?;
        match &self.condition {
            Condition::Equals { value, .. } if value.as_number().is_none() => Some(false),
            Condition::NotEquals { value, .. } if value.as_number().is_none() => Some(true),
            Condition::Present { .. } => Some(true),
            Condition::Absent { .. } => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shift {
            None => write!(f, "{}", self.condition),
            Some(shift) => write!(f, "({} + {shift}) {}", self.key(), self.condition),
        }
    }
}

/// Result of regressing one requirement through one effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Regressed {
    /// The effect does not touch the requirement's key.
    Untouched,
    /// The effect guarantees the requirement.
    Achieved,
    /// The effect guarantees the requirement fails.
    Contradicted,
    /// The requirement holds afterwards iff this one holds before.
    Pending(Requirement),
}

pub fn regress(requirement: &Requirement, effect: &Effect) -> Regressed {
    if effect.key() != requirement.key() {
        return Regressed::Untouched;
    }
    match effect {
        Effect::Set { value, .. } => verdict(requirement.holds_for(Some(value))),
        Effect::Clear { .. } => verdict(requirement.holds_for(None)),
        Effect::Increment { by, .. } => {
            let shifted = Requirement {
                condition: requirement.condition.clone(),
                shift: Some(requirement.shift.unwrap_or(0.0) + by),
            };
            match shifted.constant() {
                Some(outcome) => verdict(outcome),
                None => Regressed::Pending(shifted),
            }
        }
    }
}

fn verdict(holds: bool) -> Regressed {
    if holds {
        Regressed::Achieved
    } else {
        Regressed::Contradicted
    }
}

/// Regress a requirement set through `action`.
///
/// Returns `None` when the action is irrelevant (touches no requirement) or
/// when one of its effects contradicts a requirement. Otherwise returns the
/// canonical set that must hold before the action: untouched and pending
/// requirements plus the action's own preconditions.
pub fn regress_set(open: &[Requirement], action: &Action) -> Option<Vec<Requirement>> {
    let mut touched = false;
    let mut before = Vec::with_capacity(open.len() + action.preconditions.len());

    for requirement in open {
        let outcome = action
            .effects
            .iter()
            .map(|effect| regress(requirement, effect))
            .find(|outcome| *outcome != Regressed::Untouched)
            .unwrap_or(Regressed::Untouched);
        match outcome {
            Regressed::Untouched => before.push(requirement.clone()),
            Regressed::Achieved => touched = true,
            Regressed::Contradicted => return None,
            Regressed::Pending(next) => {
                touched = true;
                before.push(next);
            }
        }
    }

    if !touched {
        return None;
    }

    before.extend(action.preconditions.iter().cloned().map(Requirement::plain));
    Some(canonicalize(before))
}

/// Sort by `(key, rendering)` and drop duplicates so equal sets compare equal.
pub fn canonicalize(mut requirements: Vec<Requirement>) -> Vec<Requirement> {
    requirements.sort_by_cached_key(|r| (r.key().to_string(), r.to_string()));
    requirements.dedup();
    requirements
}

/// Stable text identity of a canonical set.
pub fn fingerprint(requirements: &[Requirement]) -> String {
    requirements
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" & ")
}

pub fn all_hold(requirements: &[Requirement], state: &WorldState) -> bool {
    requirements.iter().all(|r| r.holds(state))
}

/// True when every member of `smaller` appears in `larger`.
pub fn is_superset(larger: &[Requirement], smaller: &[Requirement]) -> bool {
    smaller.iter().all(|r| larger.contains(r))
}

/// Detect sets no state can satisfy, judging plain requirements key by key.
pub fn is_inconsistent(requirements: &[Requirement]) -> bool {
    for (i, a) in requirements.iter().enumerate() {
        if a.shift.is_some() {
            continue;
        }
        for b in &requirements[i + 1..] {
            if b.shift.is_some() || a.key() != b.key() {
                continue;
            }
            let clash = match (&a.condition, &b.condition) {
                (Condition::Equals { value: x, .. }, Condition::Equals { value: y, .. }) => x != y,
                (Condition::Equals { value: x, .. }, Condition::NotEquals { value: y, .. })
                | (Condition::NotEquals { value: y, .. }, Condition::Equals { value: x, .. }) => {
                    x == y
                }
                (Condition::Absent { .. }, Condition::Equals { .. } | Condition::Present { .. })
                | (Condition::Equals { .. } | Condition::Present { .. }, Condition::Absent { .. }) => {
                    true
                }
                _ => false,
            };
            if clash {
                return true;
            }
        }
    }
    false
}
