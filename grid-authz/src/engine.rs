//! The authorization decision procedure.
//!
//! Evaluation is read-only: it never writes to the role store or any
//! cache, and the decision is a pure function of the principal's roles,
//! the resource's labels and the lock owner at decision time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use grid_core::expr::Expr;
use grid_core::labels::Labels;
use grid_data::Role;

use crate::action::{self, any_action_matches};

/// The resource side of a decision. For state-scoped actions this carries
/// the state's labels and, when locked, the lock owner's principal id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceContext<'a> {
    pub labels: Option<&'a Labels>,
    pub lock_owner: Option<Uuid>,
}

impl<'a> ResourceContext<'a> {
    pub fn state(labels: &'a Labels, lock_owner: Option<Uuid>) -> Self {
        Self {
            labels: Some(labels),
            lock_owner,
        }
    }
}

/// Which rule allowed the request. Logged for audit trails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowReason {
    /// A role covered the action with no scope restriction.
    UnscopedRole(String),
    /// A role's scope expression matched the resource labels.
    ScopeMatch(String),
    /// The principal holds the Terraform lock on this state.
    LockHolder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Decide whether a principal may perform `action` on the resource.
///
/// 1. A role covering the action with an empty scope allows.
/// 2. A role covering the action whose scope expression evaluates true
///    against the resource labels allows.
/// 3. For state write/unlock on a locked state, the lock holder is
///    allowed regardless of scope (the Terraform locking protocol already
///    granted them exclusive write access).
/// 4. Otherwise deny.
pub fn authorize(
    principal_id: Uuid,
    roles: &[Role],
    action: &str,
    resource: &ResourceContext<'_>,
) -> Decision {
    let empty = Labels::new();
    let labels = resource.labels.unwrap_or(&empty);

    for role in roles {
        if !any_action_matches(&role.actions, action) {
            continue;
        }
        if role.scope_expr.trim().is_empty() {
            return Decision::Allow(AllowReason::UnscopedRole(role.name.clone()));
        }
        match Expr::parse(&role.scope_expr) {
            Ok(expr) => {
                if expr.evaluate(labels) {
                    return Decision::Allow(AllowReason::ScopeMatch(role.name.clone()));
                }
            }
            Err(err) => {
                // A malformed scope never grants access.
                warn!(role = %role.name, error = %err, "unparseable role scope expression");
            }
        }
    }

    if matches!(action, action::STATE_WRITE | action::STATE_UNLOCK)
        && resource.lock_owner == Some(principal_id)
    {
        return Decision::Allow(AllowReason::LockHolder);
    }

    Decision::Deny
}

/// What a principal can currently do, rendered for CLIs and the webapp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePermissions {
    pub roles: Vec<String>,
    pub actions: Vec<String>,
    /// Role name → its scope expression (empty string = unrestricted).
    pub label_scope_exprs: BTreeMap<String, String>,
}

impl EffectivePermissions {
    /// Flatten a role set into the view type.
    pub fn from_roles(roles: &[Role]) -> Self {
        let mut names: Vec<String> = roles.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names.dedup();

        let mut actions: Vec<String> = roles
            .iter()
            .flat_map(|r| r.actions.iter().cloned())
            .collect();
        actions.sort();
        actions.dedup();

        let label_scope_exprs = roles
            .iter()
            .map(|r| (r.name.clone(), r.scope_expr.clone()))
            .collect();

        Self {
            roles: names,
            actions,
            label_scope_exprs,
        }
    }
}
