//! Create-constraint and immutable-key enforcement.
//!
//! The state service consults these after the engine's action decision:
//! constraints narrow which label values a role may create, and immutable
//! keys pin labels a role may never change after creation.

use grid_core::expr::Expr;
use grid_core::labels::Labels;
use grid_core::GridError;
use grid_data::Role;

use crate::action::{self, any_action_matches};

/// May some role in the set create a state with these labels?
///
/// A role qualifies when it covers `state:create`, every `required`
/// constraint key is present, and every constrained key that is present
/// carries one of the allowed values. Scope is the engine's concern, not
/// repeated here.
pub fn check_create(roles: &[Role], labels: &Labels) -> Result<(), GridError> {
    let candidates: Vec<&Role> = roles
        .iter()
        .filter(|r| any_action_matches(&r.actions, action::STATE_CREATE))
        .collect();
    if candidates.is_empty() {
        return Err(GridError::permission_denied(
            "no role grants state:create",
        ));
    }
    for role in &candidates {
        if role_allows_create(role, labels) {
            return Ok(());
        }
    }
    Err(GridError::permission_denied(
        "requested label values violate the create constraints of every granting role",
    ))
}

fn role_allows_create(role: &Role, labels: &Labels) -> bool {
    for (key, constraint) in &role.create_constraints {
        match labels.get(key) {
            None => {
                if constraint.required {
                    return false;
                }
            }
            Some(value) => {
                if !constraint.allowed_values.is_empty()
                    && !constraint.allowed_values.contains(value)
                {
                    return false;
                }
            }
        }
    }
    true
}

/// May some role in the set change the labels of a state from `old` to
/// `new`? The changed key set must be disjoint from the immutable keys of
/// at least one role that both covers `state:write` and is in scope for
/// the state as it currently stands.
pub fn check_label_update(roles: &[Role], old: &Labels, new: &Labels) -> Result<(), GridError> {
    let changed = changed_keys(old, new);
    if changed.is_empty() {
        return Ok(());
    }

    let mut saw_candidate = false;
    for role in roles {
        if !any_action_matches(&role.actions, action::STATE_WRITE) {
            continue;
        }
        if !scope_covers(role, old) {
            continue;
        }
        saw_candidate = true;
        if changed.iter().all(|key| !role.immutable_keys.contains(key)) {
            return Ok(());
        }
    }

    if saw_candidate {
        Err(GridError::permission_denied(format!(
            "labels [{}] are immutable for the granting roles",
            changed.join(", ")
        )))
    } else {
        Err(GridError::permission_denied(
            "no role grants label updates on this state",
        ))
    }
}

fn scope_covers(role: &Role, labels: &Labels) -> bool {
    if role.scope_expr.trim().is_empty() {
        return true;
    }
    match Expr::parse(&role.scope_expr) {
        Ok(expr) => expr.evaluate(labels),
        Err(_) => false,
    }
}

fn changed_keys(old: &Labels, new: &Labels) -> Vec<String> {
    let mut changed = Vec::new();
    for (key, value) in old {
        if new.get(key) != Some(value) {
            changed.push(key.clone());
        }
    }
    for key in new.keys() {
        if !old.contains_key(key) {
            changed.push(key.clone());
        }
    }
    changed.sort();
    changed
}
