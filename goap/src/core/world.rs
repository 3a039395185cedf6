//! World-state facts and the closed condition/effect vocabulary.
//!
//! Conditions and effects are tagged variants rather than free-form objects so
//! the planner can reason about them exhaustively without running any action
//! code. Everything here is pure: no I/O, no shared state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar fact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fact {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Fact {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Fact::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// False for NaN or infinite numbers; other variants are always finite.
    pub fn is_finite(&self) -> bool {
        self.as_number().is_none_or(f64::is_finite)
    }
}

impl From<bool> for Fact {
    fn from(value: bool) -> Self {
        Fact::Bool(value)
    }
}

impl From<f64> for Fact {
    fn from(value: f64) -> Self {
        Fact::Number(value)
    }
}

impl From<i32> for Fact {
    fn from(value: i32) -> Self {
        Fact::Number(f64::from(value))
    }
}

impl From<&str> for Fact {
    fn from(value: &str) -> Self {
        Fact::Text(value.to_string())
    }
}

impl From<String> for Fact {
    fn from(value: String) -> Self {
        Fact::Text(value)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Bool(b) => write!(f, "{b}"),
            Fact::Number(n) => write!(f, "{n}"),
            Fact::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Named facts describing the environment. A missing key is "unknown", which
/// is distinct from an explicit `false` or `0`.
pub type WorldState = BTreeMap<String, Fact>;

/// Numeric reading of a fact for increments: missing and non-numeric values
/// count as zero.
pub fn numeric_or_zero(value: Option<&Fact>) -> f64 {
    value.and_then(Fact::as_number).unwrap_or(0.0)
}

/// A test against a single fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Key present with exactly this value.
    Equals { key: String, value: Fact },
    /// Key missing, or present with a different value.
    NotEquals { key: String, value: Fact },
    /// Key present, numeric, and `>= value`.
    AtLeast { key: String, value: f64 },
    /// Key present, numeric, and `<= value`.
    AtMost { key: String, value: f64 },
    Present { key: String },
    /// The explicit "unset" target.
    Absent { key: String },
}

impl Condition {
    pub fn equals(key: impl Into<String>, value: impl Into<Fact>) -> Self {
        Condition::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<Fact>) -> Self {
        Condition::NotEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn at_least(key: impl Into<String>, value: f64) -> Self {
        Condition::AtLeast {
            key: key.into(),
            value,
        }
    }

    pub fn at_most(key: impl Into<String>, value: f64) -> Self {
        Condition::AtMost {
            key: key.into(),
            value,
        }
    }

    pub fn present(key: impl Into<String>) -> Self {
        Condition::Present { key: key.into() }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Condition::Absent { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Condition::Equals { key, .. }
            | Condition::NotEquals { key, .. }
            | Condition::AtLeast { key, .. }
            | Condition::AtMost { key, .. }
            | Condition::Present { key }
            | Condition::Absent { key } => key,
        }
    }

    /// Evaluate against the value currently stored under this condition's key.
    pub fn holds_for(&self, value: Option<&Fact>) -> bool {
        match self {
            Condition::Equals { value: want, .. } => value == Some(want),
            Condition::NotEquals { value: want, .. } => value != Some(want),
            Condition::AtLeast { value: bound, .. } => {
                value.and_then(Fact::as_number).is_some_and(|n| n >= *bound)
            }
            Condition::AtMost { value: bound, .. } => {
                value.and_then(Fact::as_number).is_some_and(|n| n <= *bound)
            }
            Condition::Present { .. } => value.is_some(),
            Condition::Absent { .. } => value.is_none(),
        }
    }

    pub fn holds(&self, state: &WorldState) -> bool {
        self.holds_for(state.get(self.key()))
    }

    pub(crate) fn is_finite(&self) -> bool {
        match self {
            Condition::Equals { value, .. } | Condition::NotEquals { value, .. } => {
                value.is_finite()
            }
            Condition::AtLeast { value, .. } | Condition::AtMost { value, .. } => {
                value.is_finite()
            }
            Condition::Present { .. } | Condition::Absent { .. } => true,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equals { key, value } => write!(f, "{key} == {value}"),
            Condition::NotEquals { key, value } => write!(f, "{key} != {value}"),
            Condition::AtLeast { key, value } => write!(f, "{key} >= {value}"),
            Condition::AtMost { key, value } => write!(f, "{key} <= {value}"),
            Condition::Present { key } => write!(f, "{key} is set"),
            Condition::Absent { key } => write!(f, "{key} is unset"),
        }
    }
}

/// A change to a single fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Effect {
    Set { key: String, value: Fact },
    /// Adds `by` to the prior value (missing or non-numeric counts as zero).
    Increment { key: String, by: f64 },
    Clear { key: String },
}

impl Effect {
    pub fn set(key: impl Into<String>, value: impl Into<Fact>) -> Self {
        Effect::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn increment(key: impl Into<String>, by: f64) -> Self {
        Effect::Increment { key: key.into(), by }
    }

    pub fn clear(key: impl Into<String>) -> Self {
        Effect::Clear { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Effect::Set { key, .. } | Effect::Increment { key, .. } | Effect::Clear { key } => key,
        }
    }

    /// The value this effect leaves behind given the prior value (`None` = unset).
    pub fn resolve(&self, prior: Option<&Fact>) -> Option<Fact> {
        match self {
            Effect::Set { value, .. } => Some(value.clone()),
            Effect::Increment { by, .. } => Some(Fact::Number(numeric_or_zero(prior) + by)),
            Effect::Clear { .. } => None,
        }
    }

    /// The condition this effect guarantees once applied to `before`.
    pub fn implied_condition(&self, before: &WorldState) -> Condition {
        match self.resolve(before.get(self.key())) {
            Some(value) => Condition::equals(self.key(), value),
            None => Condition::absent(self.key()),
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        match self {
            Effect::Set { value, .. } => value.is_finite(),
            Effect::Increment { by, .. } => by.is_finite(),
            Effect::Clear { .. } => true,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Set { key, value } => write!(f, "{key} := {value}"),
            Effect::Increment { key, by } => write!(f, "{key} += {by}"),
            Effect::Clear { key } => write!(f, "unset {key}"),
        }
    }
}

/// True when every condition holds in `state`. An empty list always matches.
pub fn matches(state: &WorldState, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| condition.holds(state))
}

/// Conditions from `conditions` that do not hold in `state`, in declaration order.
pub fn unmet<'a>(state: &WorldState, conditions: &'a [Condition]) -> Vec<&'a Condition> {
    conditions
        .iter()
        .filter(|condition| !condition.holds(state))
        .collect()
}

/// Apply `effects` to a copy of `state`.
///
/// Every effect reads the input state, never the partially updated copy, so
/// effects within one action behave as if applied simultaneously.
pub fn apply_effects(state: &WorldState, effects: &[Effect]) -> WorldState {
    let mut next = state.clone();
    for effect in effects {
        let key = effect.key();
        match effect.resolve(state.get(key)) {
            Some(value) => {
                next.insert(key.to_string(), value);
            }
            None => {
                next.remove(key);
            }
        }
    }
    next
}

/// Convert a goal map into the equivalent list of equality conditions.
pub fn goal_conditions(goal: &WorldState) -> Vec<Condition> {
    goal.iter()
        .map(|(key, value)| Condition::equals(key.clone(), value.clone()))
        .collect()
}
