use chrono::{Duration, Utc};
use uuid::Uuid;

use grid_core::labels::Labels;
use grid_data::{
    DataError, DependencyEdge, InMemoryRepositories, LockInfo, LockOutcome, PrincipalRef,
    RevokedJti, Session, StateRecord, UnlockOutcome, User,
};
use grid_graph::EdgeStatus;

fn state(logic_id: &str) -> StateRecord {
    let now = Utc::now();
    StateRecord {
        guid: Uuid::now_v7(),
        logic_id: logic_id.to_string(),
        content: None,
        labels: Labels::new(),
        lock: None,
        created_at: now,
        updated_at: now,
    }
}

fn lock(id: &str) -> LockInfo {
    LockInfo {
        id: id.to_string(),
        ..Default::default()
    }
}

fn edge(from: Uuid, output: &str, to: Uuid) -> DependencyEdge {
    let now = Utc::now();
    DependencyEdge {
        id: Uuid::now_v7(),
        from_state: from,
        from_output: output.to_string(),
        to_state: to,
        to_input_name: "input".into(),
        status: EdgeStatus::Pending,
        in_digest: None,
        out_digest: None,
        mock_value: None,
        last_in_at: None,
        last_out_at: None,
        created_at: now,
        updated_at: now,
    }
}

// ── states ──

#[tokio::test]
async fn logic_id_and_guid_are_unique() {
    let repos = InMemoryRepositories::new();
    let first = state("net");
    repos.states.create(&first).await.unwrap();

    let same_logic_id = state("net");
    assert!(matches!(
        repos.states.create(&same_logic_id).await,
        Err(DataError::Conflict(_))
    ));

    let mut same_guid = state("other");
    same_guid.guid = first.guid;
    assert!(matches!(
        repos.states.create(&same_guid).await,
        Err(DataError::Conflict(_))
    ));
}

#[tokio::test]
async fn lock_compare_and_set() {
    let repos = InMemoryRepositories::new();
    let record = state("net");
    repos.states.create(&record).await.unwrap();

    assert_eq!(
        repos.states.try_lock(record.guid, &lock("L1")).await.unwrap(),
        LockOutcome::Acquired
    );
    // A second acquisition reports the holder, not a new lock.
    match repos.states.try_lock(record.guid, &lock("L2")).await.unwrap() {
        LockOutcome::Held(holder) => assert_eq!(holder.id, "L1"),
        other => panic!("expected Held, got {other:?}"),
    }

    assert_eq!(
        repos.states.unlock(record.guid, "L2").await.unwrap(),
        UnlockOutcome::IdMismatch
    );
    assert_eq!(
        repos.states.unlock(record.guid, "L1").await.unwrap(),
        UnlockOutcome::Unlocked
    );
    assert_eq!(
        repos.states.unlock(record.guid, "L1").await.unwrap(),
        UnlockOutcome::NotLocked
    );

    // Lock/unlock restored the unlocked state.
    assert!(repos.states.get(record.guid).await.unwrap().unwrap().lock.is_none());
}

// ── edges ──

#[tokio::test]
async fn edge_triple_is_unique_per_producer() {
    let repos = InMemoryRepositories::new();
    let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());

    repos.edges.insert(&edge(a, "x", b)).await.unwrap();
    // Same triple conflicts.
    assert!(matches!(
        repos.edges.insert(&edge(a, "x", b)).await,
        Err(DataError::Conflict(_))
    ));
    // Different consumer or different output key is fine.
    repos.edges.insert(&edge(a, "x", c)).await.unwrap();
    repos.edges.insert(&edge(a, "y", b)).await.unwrap();

    assert_eq!(repos.edges.list_outgoing(a).await.unwrap().len(), 3);
    assert_eq!(repos.edges.count_for_state(b).await.unwrap(), 2);
}

#[tokio::test]
async fn deleting_an_edge_frees_its_triple() {
    let repos = InMemoryRepositories::new();
    let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
    let e = edge(a, "x", b);
    repos.edges.insert(&e).await.unwrap();
    assert!(repos.edges.delete(e.id).await.unwrap());
    assert!(!repos.edges.delete(e.id).await.unwrap());
    repos.edges.insert(&edge(a, "x", b)).await.unwrap();
}

// ── sessions ──

#[tokio::test]
async fn sessions_resolve_by_token_hash_and_expire() {
    let repos = InMemoryRepositories::new();
    let now = Utc::now();
    let session = Session {
        id: Uuid::now_v7(),
        principal: PrincipalRef::User(Uuid::now_v7()),
        token_hash: "abc123".into(),
        groups: vec!["dev".into()],
        upstream_refresh_token: None,
        upstream_id_token: None,
        expires_at: now - Duration::seconds(1),
        user_agent: None,
        ip: None,
        revoked: false,
        created_at: now,
        last_used_at: None,
    };
    repos.sessions.insert(&session).await.unwrap();
    // Idempotent on the primary key.
    repos.sessions.insert(&session).await.unwrap();

    let found = repos
        .sessions
        .find_by_token_hash("abc123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, session.id);
    assert!(found.expired(now));

    assert_eq!(repos.sessions.delete_expired(now).await.unwrap(), 1);
    assert!(repos
        .sessions
        .find_by_token_hash("abc123")
        .await
        .unwrap()
        .is_none());
}

// ── revoked JTIs ──

#[tokio::test]
async fn jti_inserts_are_idempotent_and_purgeable() {
    let repos = InMemoryRepositories::new();
    let entry = RevokedJti {
        jti: "jti-1".into(),
        subject: "alice".into(),
        expires_at: Utc::now() - Duration::seconds(1),
        revoked_at: Utc::now(),
        revoked_by: "admin".into(),
    };
    repos.revoked_jtis.insert(&entry).await.unwrap();
    repos.revoked_jtis.insert(&entry).await.unwrap();
    assert!(repos.revoked_jtis.is_revoked("jti-1").await.unwrap());
    assert!(!repos.revoked_jtis.is_revoked("jti-2").await.unwrap());

    assert_eq!(repos.revoked_jtis.purge_expired(Utc::now()).await.unwrap(), 1);
    assert!(!repos.revoked_jtis.is_revoked("jti-1").await.unwrap());
}

// ── users ──

#[tokio::test]
async fn user_subject_and_email_are_unique() {
    let repos = InMemoryRepositories::new();
    let now = Utc::now();
    let user = User {
        id: Uuid::now_v7(),
        subject: Some("sub-1".into()),
        email: "alice@example.com".into(),
        display_name: "Alice".into(),
        disabled: false,
        created_at: now,
        last_used_at: None,
    };
    repos.users.insert(&user).await.unwrap();

    let mut same_subject = user.clone();
    same_subject.id = Uuid::now_v7();
    same_subject.email = "alice2@example.com".into();
    assert!(matches!(
        repos.users.insert(&same_subject).await,
        Err(DataError::Conflict(_))
    ));

    let mut same_email = user.clone();
    same_email.id = Uuid::now_v7();
    same_email.subject = Some("sub-2".into());
    assert!(matches!(
        repos.users.insert(&same_email).await,
        Err(DataError::Conflict(_))
    ));

    let found = repos.users.find_by_subject("sub-1").await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
}
