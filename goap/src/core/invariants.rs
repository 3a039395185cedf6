//! Registration-time invariants for catalog actions.

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::action::Action;

/// Check an action before it joins a catalog:
/// - Non-empty name, unique among `registered`
/// - Non-empty task type
/// - Finite, non-negative estimated cost
/// - At least one effect, and at most one effect per key
/// - Finite numbers in every condition and effect
///
/// Returns a list of stable error messages (empty on success).
pub fn validate_action(action: &Action, registered: &[Arc<Action>]) -> Vec<String> {
    let mut errors = Vec::new();

    if action.name.trim().is_empty() {
        errors.push("name must be non-empty".to_string());
    } else if registered.iter().any(|other| other.name == action.name) {
        errors.push(format!("duplicate action name '{}'", action.name));
    }

    if action.task_type.trim().is_empty() {
        errors.push("task_type must be non-empty".to_string());
    }

    if !action.estimated_cost_usd.is_finite() || action.estimated_cost_usd < 0.0 {
        errors.push(format!(
            "estimated_cost_usd must be finite and >= 0 (got {})",
            action.estimated_cost_usd
        ));
    }

    if action.effects.is_empty() {
        errors.push("at least one effect is required".to_string());
    }

    let mut effect_keys = HashSet::new();
    for effect in &action.effects {
        if !effect_keys.insert(effect.key()) {
            errors.push(format!("multiple effects on key '{}'", effect.key()));
        }
        if !effect.is_finite() {
            errors.push(format!("effect '{}' has a non-finite number", effect));
        }
    }

    for condition in &action.preconditions {
        if !condition.is_finite() {
            errors.push(format!(
                "precondition '{}' has a non-finite number",
                condition
            ));
        }
    }

    errors
}
