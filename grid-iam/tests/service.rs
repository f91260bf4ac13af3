use chrono::Utc;
use uuid::Uuid;

use grid_core::{AuthReason, ErrorKind};
use grid_data::{GroupRole, InMemoryRepositories, PrincipalRef, Repositories};
use grid_iam::service::RoleSpec;
use grid_iam::token::SessionParams;
use grid_iam::{CredentialKind, Credentials, IamOptions, IamService};

fn iam(repos: Repositories) -> IamService {
    IamService::new(repos, IamOptions::default())
}

async fn seeded(repos: &Repositories) -> IamService {
    let service = iam(repos.clone());
    service.seed_system_roles().await.unwrap();
    service
}

// ── seeding ──

#[tokio::test]
async fn seeding_is_idempotent_and_creates_the_system_roles() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    service.seed_system_roles().await.unwrap();

    let lookup = service
        .get_roles_by_name(&[
            "platform-engineer".into(),
            "product-engineer".into(),
            "service-account".into(),
        ])
        .await
        .unwrap();
    assert!(lookup.all_valid);
    assert_eq!(lookup.found.len(), 3);
    assert!(lookup.found.iter().all(|r| r.system));
    // Seeding twice never duplicated rows.
    assert_eq!(repos.roles.list().await.unwrap().len(), 3);
}

// ── sessions ──

#[tokio::test]
async fn login_session_authenticates_with_roles_attached() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;

    let user = service
        .jit_provision_user("alice-sub", "alice@example.com", "Alice")
        .await
        .unwrap();
    let role = service
        .get_roles_by_name(&["platform-engineer".into()])
        .await
        .unwrap()
        .found
        .remove(0);
    service.assign_role_to_user(user.id, role.id).await.unwrap();

    let (session, token) = service
        .login_user(user.id, SessionParams::default())
        .await
        .unwrap();
    assert!(!token.is_empty());

    let principal = service
        .authenticate(&Credentials::bearer(token))
        .await
        .unwrap();
    assert_eq!(principal.id(), user.id);
    assert_eq!(principal.credential, CredentialKind::Session);
    assert_eq!(principal.session_id, Some(session.id));
    assert_eq!(principal.role_names(), vec!["platform-engineer"]);
}

#[tokio::test]
async fn revoked_session_is_a_terminal_failure() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;

    let user = service
        .jit_provision_user("bob-sub", "bob@example.com", "Bob")
        .await
        .unwrap();
    let (session, token) = service
        .login_user(user.id, SessionParams::default())
        .await
        .unwrap();
    service.revoke_session(session.id).await.unwrap();

    let err = service
        .authenticate(&Credentials::bearer(token))
        .await
        .unwrap_err();
    assert_eq!(err.auth_reason(), Some(AuthReason::Revoked));
}

#[tokio::test]
async fn unknown_bearer_is_missing_credentials() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    let err = service
        .authenticate(&Credentials::bearer("never-issued"))
        .await
        .unwrap_err();
    assert_eq!(err.auth_reason(), Some(AuthReason::Missing));
}

// ── service accounts & client credentials ──

#[tokio::test]
async fn client_credentials_grant_round_trip() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;

    let (account, secret) = service
        .create_service_account("deployer", "CI deployments")
        .await
        .unwrap();
    let sa_role = service
        .get_roles_by_name(&["service-account".into()])
        .await
        .unwrap()
        .found
        .remove(0);
    service
        .assign_roles_to_service_account(account.id, &[sa_role.id])
        .await
        .unwrap();

    let (token, expires_in) = service
        .issue_client_token(&account.client_id, &secret, None, None)
        .await
        .unwrap();
    assert!(expires_in > 0);

    let principal = service
        .authenticate(&Credentials::bearer(token))
        .await
        .unwrap();
    assert_eq!(principal.id(), account.id);
    assert_eq!(principal.role_names(), vec!["service-account"]);
    assert!(principal
        .qualified_id()
        .to_string()
        .starts_with("sa:"));
}

#[tokio::test]
async fn wrong_client_secret_is_rejected() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    let (account, _secret) = service
        .create_service_account("deployer", "")
        .await
        .unwrap();

    let err = service
        .issue_client_token(&account.client_id, "wrong", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn duplicate_service_account_name_conflicts() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    service.create_service_account("deployer", "").await.unwrap();
    let err = service
        .create_service_account("deployer", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn role_assignment_validates_both_sides() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    let (account, _) = service.create_service_account("deployer", "").await.unwrap();

    let err = service
        .assign_roles_to_service_account(Uuid::now_v7(), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = service
        .assign_roles_to_service_account(account.id, &[Uuid::now_v7()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn removing_roles_detaches_them() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    let (account, secret) = service.create_service_account("deployer", "").await.unwrap();
    let sa_role = service
        .get_roles_by_name(&["service-account".into()])
        .await
        .unwrap()
        .found
        .remove(0);
    service
        .assign_roles_to_service_account(account.id, &[sa_role.id])
        .await
        .unwrap();
    service
        .remove_roles_from_service_account(account.id, &[sa_role.id])
        .await
        .unwrap();

    let (token, _) = service
        .issue_client_token(&account.client_id, &secret, None, None)
        .await
        .unwrap();
    let principal = service
        .authenticate(&Credentials::bearer(token))
        .await
        .unwrap();
    assert!(principal.roles.is_empty());
}

#[tokio::test]
async fn purge_drops_expired_sessions_and_jtis() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;

    let user = service
        .jit_provision_user("eve-sub", "eve@example.com", "Eve")
        .await
        .unwrap();
    // An already-expired session and an already-expired denylist row.
    grid_iam::token::issue_session(
        repos.sessions.as_ref(),
        PrincipalRef::User(user.id),
        0,
        grid_iam::token::SessionParams::default(),
    )
    .await
    .unwrap();
    service
        .revoke_jti("old-jti", "eve-sub", Utc::now() - chrono::Duration::hours(1), "admin")
        .await
        .unwrap();

    let (sessions, jtis) = service.purge_expired().await.unwrap();
    assert_eq!(sessions, 1);
    assert_eq!(jtis, 1);

    // A second purge finds nothing.
    assert_eq!(service.purge_expired().await.unwrap(), (0, 0));
}

// ── roles ──

#[tokio::test]
async fn role_name_lookup_reports_invalid_names() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    let lookup = service
        .get_roles_by_name(&["platform-engineer".into(), "made-up".into()])
        .await
        .unwrap();
    assert!(!lookup.all_valid);
    assert_eq!(lookup.invalid_names, vec!["made-up".to_string()]);
    assert_eq!(lookup.found.len(), 1);
}

#[tokio::test]
async fn admin_roles_have_a_life_cycle_and_system_roles_do_not_delete() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;

    let role = service
        .create_role(RoleSpec {
            name: "auditor".into(),
            description: "read-only".into(),
            scope_expr: String::new(),
            actions: vec!["state:read".into(), "state:list".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(role.version, 1);

    let updated = service
        .update_role(
            role.id,
            RoleSpec {
                name: "auditor".into(),
                description: "read-only, dev only".into(),
                scope_expr: r#"env == "dev""#.into(),
                actions: vec!["state:read".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.scope_expr, r#"env == "dev""#);

    service.delete_role(role.id).await.unwrap();

    let platform = service
        .get_roles_by_name(&["platform-engineer".into()])
        .await
        .unwrap()
        .found
        .remove(0);
    let err = service.delete_role(platform.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn role_spec_validation_rejects_bad_scopes() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;
    let err = service
        .create_role(RoleSpec {
            name: "broken".into(),
            actions: vec!["state:read".into()],
            scope_expr: "env == ".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ── effective permissions ──

#[tokio::test]
async fn effective_permissions_union_direct_and_group_roles() {
    let repos = InMemoryRepositories::new();
    let service = seeded(&repos).await;

    let user = service
        .jit_provision_user("carol-sub", "carol@example.com", "Carol")
        .await
        .unwrap();
    let product = service
        .get_roles_by_name(&["product-engineer".into()])
        .await
        .unwrap()
        .found
        .remove(0);
    let platform = service
        .get_roles_by_name(&["platform-engineer".into()])
        .await
        .unwrap()
        .found
        .remove(0);

    service.assign_role_to_user(user.id, product.id).await.unwrap();
    repos
        .role_bindings
        .insert_group_role(&GroupRole {
            id: Uuid::now_v7(),
            group: "admins".into(),
            role_id: platform.id,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    service.refresh_group_role_cache().await.unwrap();

    let perms = service
        .effective_permissions(PrincipalRef::User(user.id), &["admins".to_string()])
        .await
        .unwrap();
    assert_eq!(perms.roles, vec!["platform-engineer", "product-engineer"]);
    assert!(perms.actions.contains(&"*".to_string()));
    assert_eq!(
        perms.label_scope_exprs.get("product-engineer").unwrap(),
        r#"env != "prod""#
    );

    // Without the group, only the direct binding applies.
    let direct_only = service
        .effective_permissions(PrincipalRef::User(user.id), &[])
        .await
        .unwrap();
    assert_eq!(direct_only.roles, vec!["product-engineer"]);
}
