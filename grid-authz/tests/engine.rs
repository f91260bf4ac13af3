use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use grid_authz::{action, authorize, AllowReason, Decision, ResourceContext};
use grid_core::labels::labels;
use grid_data::Role;

fn role(name: &str, actions: &[&str], scope_expr: &str) -> Role {
    let now = Utc::now();
    Role {
        id: Uuid::now_v7(),
        name: name.to_string(),
        description: String::new(),
        scope_expr: scope_expr.to_string(),
        actions: actions.iter().map(|a| a.to_string()).collect(),
        create_constraints: BTreeMap::new(),
        immutable_keys: Vec::new(),
        version: 1,
        system: false,
        created_at: now,
        updated_at: now,
    }
}

// ── the four decision steps ──

#[test]
fn unscoped_role_allows() {
    let roles = vec![role("platform-engineer", &["*"], "")];
    let l = labels([("env", "prod")]);
    let decision = authorize(
        Uuid::now_v7(),
        &roles,
        action::STATE_WRITE,
        &ResourceContext::state(&l, None),
    );
    assert_eq!(
        decision,
        Decision::Allow(AllowReason::UnscopedRole("platform-engineer".into()))
    );
}

#[test]
fn scope_match_allows() {
    let roles = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let l = labels([("env", "dev")]);
    let decision = authorize(
        Uuid::now_v7(),
        &roles,
        action::STATE_WRITE,
        &ResourceContext::state(&l, None),
    );
    assert_eq!(
        decision,
        Decision::Allow(AllowReason::ScopeMatch("product-engineer".into()))
    );
}

#[test]
fn out_of_scope_denies() {
    let roles = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let l = labels([("env", "prod")]);
    let decision = authorize(
        Uuid::now_v7(),
        &roles,
        action::STATE_WRITE,
        &ResourceContext::state(&l, None),
    );
    assert_eq!(decision, Decision::Deny);
}

#[test]
fn action_mismatch_denies_even_in_scope() {
    let roles = vec![role("reader", &["state:read"], "")];
    let l = labels([("env", "dev")]);
    let decision = authorize(
        Uuid::now_v7(),
        &roles,
        action::STATE_WRITE,
        &ResourceContext::state(&l, None),
    );
    assert_eq!(decision, Decision::Deny);
}

// ── lock-holder bypass ──

#[test]
fn lock_holder_may_write_out_of_scope() {
    let principal = Uuid::now_v7();
    let roles = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let l = labels([("env", "prod")]);

    let held_by_principal = ResourceContext::state(&l, Some(principal));
    let decision = authorize(principal, &roles, action::STATE_WRITE, &held_by_principal);
    assert_eq!(decision, Decision::Allow(AllowReason::LockHolder));

    let decision = authorize(principal, &roles, action::STATE_UNLOCK, &held_by_principal);
    assert_eq!(decision, Decision::Allow(AllowReason::LockHolder));
}

#[test]
fn lock_holder_bypass_is_limited_to_write_and_unlock() {
    let principal = Uuid::now_v7();
    let roles = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let l = labels([("env", "prod")]);
    let resource = ResourceContext::state(&l, Some(principal));
    assert_eq!(
        authorize(principal, &roles, action::STATE_DELETE, &resource),
        Decision::Deny
    );
    assert_eq!(
        authorize(principal, &roles, action::STATE_READ, &resource),
        Decision::Deny
    );
}

#[test]
fn someone_elses_lock_grants_nothing() {
    let principal = Uuid::now_v7();
    let other = Uuid::now_v7();
    let roles = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let l = labels([("env", "prod")]);
    let resource = ResourceContext::state(&l, Some(other));
    assert_eq!(
        authorize(principal, &roles, action::STATE_WRITE, &resource),
        Decision::Deny
    );
}

// ── robustness ──

#[test]
fn empty_role_set_denies() {
    let l = labels([("env", "dev")]);
    assert_eq!(
        authorize(
            Uuid::now_v7(),
            &[],
            action::STATE_READ,
            &ResourceContext::state(&l, None)
        ),
        Decision::Deny
    );
}

#[test]
fn malformed_scope_never_grants() {
    let roles = vec![role("broken", &["state:*"], "env == ")];
    let l = labels([("env", "dev")]);
    assert_eq!(
        authorize(
            Uuid::now_v7(),
            &roles,
            action::STATE_READ,
            &ResourceContext::state(&l, None)
        ),
        Decision::Deny
    );
}

#[test]
fn resource_without_labels_only_matches_unscoped_roles() {
    let scoped = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let unscoped = vec![role("platform-engineer", &["*"], "")];
    let resource = ResourceContext::default();
    assert_eq!(
        authorize(Uuid::now_v7(), &scoped, action::STATE_LIST, &resource),
        Decision::Deny
    );
    assert!(authorize(Uuid::now_v7(), &unscoped, action::STATE_LIST, &resource).is_allowed());
}

// ── decision purity ──

#[test]
fn decision_is_a_pure_function_of_its_inputs() {
    let principal = Uuid::now_v7();
    let roles = vec![role("product-engineer", &["state:*"], r#"env == "dev""#)];
    let l = labels([("env", "dev")]);
    let resource = ResourceContext::state(&l, None);
    let first = authorize(principal, &roles, action::STATE_WRITE, &resource);
    for _ in 0..10 {
        assert_eq!(
            authorize(principal, &roles, action::STATE_WRITE, &resource),
            first
        );
    }
}
