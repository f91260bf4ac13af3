use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use grid_core::labels::{labels, LabelValue, Labels};
use grid_core::ErrorKind;
use grid_data::{CreateConstraint, InMemoryRepositories, LockInfo, Repositories, Role};
use grid_state::{
    AllowAllLabels, LabelPolicy, PolicyViolation, StateService, MAX_LOGIC_ID_LEN,
    SIZE_WARNING_BYTES,
};

const SERVER_URL: &str = "https://grid.example.com";

fn admin_roles() -> Vec<Role> {
    let now = Utc::now();
    vec![Role {
        id: Uuid::now_v7(),
        name: "platform-engineer".into(),
        description: String::new(),
        scope_expr: String::new(),
        actions: vec!["*".into()],
        create_constraints: BTreeMap::new(),
        immutable_keys: Vec::new(),
        version: 1,
        system: true,
        created_at: now,
        updated_at: now,
    }]
}

fn service(repos: &Repositories) -> StateService {
    StateService::new(repos.clone(), Arc::new(AllowAllLabels), SERVER_URL)
}

async fn create(service: &StateService, logic_id: &str) -> Uuid {
    let guid = Uuid::now_v7();
    service
        .create_state(&guid.to_string(), logic_id, Labels::new(), &admin_roles())
        .await
        .unwrap();
    guid
}

fn lock(id: &str) -> LockInfo {
    LockInfo {
        id: id.to_string(),
        operation: "apply".into(),
        who: "alice".into(),
        ..Default::default()
    }
}

// ── creation ──

#[tokio::test]
async fn create_returns_derived_backend_config() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = Uuid::now_v7();
    let config = service
        .create_state(
            &guid.to_string(),
            "prod-net",
            labels([("env", "prod")]),
            &admin_roles(),
        )
        .await
        .unwrap();
    assert_eq!(config.address, format!("{SERVER_URL}/tfstate/{guid}"));
    assert_eq!(config.lock_address, format!("{SERVER_URL}/tfstate/{guid}/lock"));
    assert_eq!(
        config.unlock_address,
        format!("{SERVER_URL}/tfstate/{guid}/unlock")
    );
}

#[tokio::test]
async fn create_rejects_a_non_uuid_guid() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let err = service
        .create_state("not-a-uuid", "x", Labels::new(), &admin_roles())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn logic_id_boundary_is_128() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);

    let exactly = "a".repeat(MAX_LOGIC_ID_LEN);
    service
        .create_state(&Uuid::now_v7().to_string(), &exactly, Labels::new(), &admin_roles())
        .await
        .unwrap();

    let too_long = "a".repeat(MAX_LOGIC_ID_LEN + 1);
    let err = service
        .create_state(&Uuid::now_v7().to_string(), &too_long, Labels::new(), &admin_roles())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = service
        .create_state(&Uuid::now_v7().to_string(), "", Labels::new(), &admin_roles())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn duplicate_logic_id_already_exists() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    create(&service, "prod-net").await;
    let err = service
        .create_state(&Uuid::now_v7().to_string(), "prod-net", Labels::new(), &admin_roles())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

struct NoTeamLabel;

#[async_trait::async_trait]
impl LabelPolicy for NoTeamLabel {
    async fn validate(&self, labels: &Labels) -> Result<(), PolicyViolation> {
        match labels.contains_key("team") {
            true => Err(PolicyViolation {
                key: "team".into(),
                reason: "label is reserved".into(),
            }),
            false => Ok(()),
        }
    }
}

#[tokio::test]
async fn label_policy_collaborator_can_reject() {
    let repos = InMemoryRepositories::new();
    let service = StateService::new(repos.clone(), Arc::new(NoTeamLabel), SERVER_URL);
    let err = service
        .create_state(
            &Uuid::now_v7().to_string(),
            "x",
            labels([("team", "payments")]),
            &admin_roles(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.to_string().contains("team"));
}

#[tokio::test]
async fn create_constraints_bind_scoped_roles() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let now = Utc::now();
    let mut constraints = BTreeMap::new();
    constraints.insert(
        "env".to_string(),
        CreateConstraint {
            allowed_values: vec![LabelValue::from("dev")],
            required: true,
        },
    );
    let scoped = vec![Role {
        id: Uuid::now_v7(),
        name: "product-engineer".into(),
        description: String::new(),
        scope_expr: String::new(),
        actions: vec!["state:*".into()],
        create_constraints: constraints,
        immutable_keys: Vec::new(),
        version: 1,
        system: false,
        created_at: now,
        updated_at: now,
    }];

    service
        .create_state(&Uuid::now_v7().to_string(), "dev-net", labels([("env", "dev")]), &scoped)
        .await
        .unwrap();
    let err = service
        .create_state(&Uuid::now_v7().to_string(), "prod-net", labels([("env", "prod")]), &scoped)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

// ── locking protocol ──

#[tokio::test]
async fn lock_write_unlock_round_trip() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;

    let stored = service.lock_state(guid, lock("L1")).await.unwrap();
    assert_eq!(stored.id, "L1");
    // A zero Created is stamped at lock time.
    assert!(stored.created.is_some());

    let outcome = service
        .update_state_content(guid, br#"{"v":4}"#, Some("L1"))
        .await
        .unwrap();
    assert!(!outcome.size_warning);

    service.unlock_state(guid, "L1").await.unwrap();
    assert!(service.get_state_lock(guid).await.unwrap().is_none());
    assert_eq!(
        service.get_state_content(guid).await.unwrap().unwrap(),
        br#"{"v":4}"#.to_vec()
    );
}

#[tokio::test]
async fn lock_conflict_carries_the_holder_verbatim() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;
    service.lock_state(guid, lock("L1")).await.unwrap();

    let err = service.lock_state(guid, lock("L2")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);
    let grid_core::GridError::Locked { lock: Some(holder), .. } = &err else {
        panic!("expected Locked with payload, got {err}");
    };
    assert_eq!(holder["ID"], "L1");
    assert_eq!(holder["Who"], "alice");
}

#[tokio::test]
async fn lock_requires_a_non_empty_id() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;
    let err = service.lock_state(guid, lock("")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn unlock_error_taxonomy() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;

    // Empty lock id.
    let err = service.unlock_state(guid, "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Not locked.
    let err = service.unlock_state(guid, "L1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    // Mismatched id.
    service.lock_state(guid, lock("L1")).await.unwrap();
    let err = service.unlock_state(guid, "L2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Lock survives the failed attempts.
    assert_eq!(service.get_state_lock(guid).await.unwrap().unwrap().id, "L1");
}

#[tokio::test]
async fn locked_state_rejects_writes_without_the_matching_id() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;
    service.lock_state(guid, lock("L1")).await.unwrap();

    let err = service
        .update_state_content(guid, b"{}", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);

    let err = service
        .update_state_content(guid, b"{}", Some("L2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;
    let err = service
        .update_state_content(guid, b"", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ── size warning ──

#[tokio::test]
async fn size_warning_triggers_past_the_threshold_and_the_write_succeeds() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "big").await;

    let at_threshold = vec![b'x'; SIZE_WARNING_BYTES];
    let outcome = service
        .update_state_content(guid, &at_threshold, None)
        .await
        .unwrap();
    assert!(!outcome.size_warning);

    let over = vec![b'x'; SIZE_WARNING_BYTES + 1];
    let outcome = service.update_state_content(guid, &over, None).await.unwrap();
    assert!(outcome.size_warning);
    assert_eq!(
        service.get_state_content(guid).await.unwrap().unwrap().len(),
        SIZE_WARNING_BYTES + 1
    );
}

// ── listing & lookup ──

#[tokio::test]
async fn list_filters_by_label_expression() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    service
        .create_state(&Uuid::now_v7().to_string(), "dev-net", labels([("env", "dev")]), &admin_roles())
        .await
        .unwrap();
    service
        .create_state(&Uuid::now_v7().to_string(), "prod-net", labels([("env", "prod")]), &admin_roles())
        .await
        .unwrap();

    let all = service.list_states(None, false).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|s| s.labels.is_none()));

    let dev = service
        .list_states(Some(r#"env == "dev""#), true)
        .await
        .unwrap();
    assert_eq!(dev.len(), 1);
    assert_eq!(dev[0].logic_id, "dev-net");
    assert!(dev[0].labels.is_some());

    let err = service.list_states(Some("env =="), false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn state_config_resolves_logic_ids() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;
    let (resolved, config) = service.get_state_config("prod-net").await.unwrap();
    assert_eq!(resolved, guid);
    assert!(config.address.ends_with(&guid.to_string()));

    let err = service.get_state_config("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ── label updates & deletion ──

#[tokio::test]
async fn label_updates_respect_immutable_keys() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = Uuid::now_v7();
    let mut restricted = admin_roles();
    restricted[0].actions = vec!["state:*".into()];
    restricted[0].immutable_keys = vec!["env".into()];

    service
        .create_state(&guid.to_string(), "dev-net", labels([("env", "dev")]), &restricted)
        .await
        .unwrap();

    let updated = service
        .update_state_labels(guid, labels([("env", "dev"), ("tier", "web")]), &restricted)
        .await
        .unwrap();
    assert_eq!(updated.labels.len(), 2);

    let err = service
        .update_state_labels(guid, labels([("env", "prod"), ("tier", "web")]), &restricted)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn delete_refuses_locked_states() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "prod-net").await;
    service.lock_state(guid, lock("L1")).await.unwrap();
    let err = service.delete_state(guid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    service.unlock_state(guid, "L1").await.unwrap();
    service.delete_state(guid).await.unwrap();
    let err = service.get_state_by_guid(guid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ── derived outputs ──

#[tokio::test]
async fn pushes_derive_the_output_table() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "network").await;

    let state_json = serde_json::json!({
        "version": 4,
        "serial": 7,
        "outputs": {
            "vpc_id": {"value": "vpc-123", "type": "string"},
            "db_password": {"value": "hunter2", "type": "string", "sensitive": true},
        }
    });
    service
        .update_state_content(guid, state_json.to_string().as_bytes(), None)
        .await
        .unwrap();

    let outputs = repos.state_outputs.list_for_state(guid).await.unwrap();
    assert_eq!(outputs.len(), 2);
    let secret = outputs.iter().find(|o| o.output_key == "db_password").unwrap();
    assert!(secret.sensitive);
    assert_eq!(secret.state_serial, 7);

    // A later push that drops an output removes its row.
    let next = serde_json::json!({
        "version": 4,
        "serial": 8,
        "outputs": {"vpc_id": {"value": "vpc-123", "type": "string"}}
    });
    service
        .update_state_content(guid, next.to_string().as_bytes(), None)
        .await
        .unwrap();
    let outputs = repos.state_outputs.list_for_state(guid).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].output_key, "vpc_id");
}

#[tokio::test]
async fn non_json_blobs_skip_output_derivation() {
    let repos = InMemoryRepositories::new();
    let service = service(&repos);
    let guid = create(&service, "opaque").await;
    service
        .update_state_content(guid, b"\x00\x01binary", None)
        .await
        .unwrap();
    assert!(repos.state_outputs.list_for_state(guid).await.unwrap().is_empty());
}
