//! Typed persistence contracts.
//!
//! Backends provide their own concurrency: uniqueness, the lock
//! compare-and-set, and multi-row role assignment are repository
//! primitives, not service-level read-modify-write sequences, so the
//! invariants hold under concurrent writers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{
    DependencyEdge, GroupRole, LockInfo, PrincipalRef, RevokedJti, Role, ServiceAccount, Session,
    StateOutput, StateRecord, User, UserRole,
};
use crate::error::DataError;
use grid_core::labels::Labels;

/// Result of an atomic lock attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Acquired,
    /// Someone else holds the lock; their metadata is returned verbatim.
    Held(LockInfo),
}

/// Result of an atomic unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    NotLocked,
    IdMismatch,
}

#[async_trait::async_trait]
pub trait StateRepository: Send + Sync {
    /// Insert a new state; `Conflict` on duplicate guid or logic_id.
    async fn create(&self, state: &StateRecord) -> Result<(), DataError>;
    async fn get(&self, guid: Uuid) -> Result<Option<StateRecord>, DataError>;
    async fn get_by_logic_id(&self, logic_id: &str) -> Result<Option<StateRecord>, DataError>;
    async fn list(&self) -> Result<Vec<StateRecord>, DataError>;
    async fn update_content(&self, guid: Uuid, content: &[u8]) -> Result<(), DataError>;
    async fn update_labels(&self, guid: Uuid, labels: &Labels) -> Result<(), DataError>;
    /// Atomically acquire the lock iff the state is unlocked.
    async fn try_lock(&self, guid: Uuid, lock: &LockInfo) -> Result<LockOutcome, DataError>;
    /// Atomically clear the lock iff `lock_id` matches the holder.
    async fn unlock(&self, guid: Uuid, lock_id: &str) -> Result<UnlockOutcome, DataError>;
    async fn delete(&self, guid: Uuid) -> Result<bool, DataError>;
}

#[async_trait::async_trait]
pub trait StateOutputRepository: Send + Sync {
    /// Insert or replace on the (state_guid, output_key) primary key.
    async fn upsert(&self, output: &StateOutput) -> Result<(), DataError>;
    async fn get(&self, state: Uuid, key: &str) -> Result<Option<StateOutput>, DataError>;
    async fn list_for_state(&self, state: Uuid) -> Result<Vec<StateOutput>, DataError>;
    async fn delete(&self, state: Uuid, key: &str) -> Result<bool, DataError>;
}

#[async_trait::async_trait]
pub trait EdgeRepository: Send + Sync {
    /// Insert a new edge; `Conflict` on a duplicate
    /// (from_state, from_output, to_state) triple.
    async fn insert(&self, edge: &DependencyEdge) -> Result<(), DataError>;
    async fn get(&self, id: Uuid) -> Result<Option<DependencyEdge>, DataError>;
    async fn find(
        &self,
        from: Uuid,
        from_output: &str,
        to: Uuid,
    ) -> Result<Option<DependencyEdge>, DataError>;
    async fn list_incoming(&self, to: Uuid) -> Result<Vec<DependencyEdge>, DataError>;
    async fn list_outgoing(&self, from: Uuid) -> Result<Vec<DependencyEdge>, DataError>;
    /// Every edge, for graph builds and cycle prediction.
    async fn list_all(&self) -> Result<Vec<DependencyEdge>, DataError>;
    async fn search_by_output(&self, output_key: &str) -> Result<Vec<DependencyEdge>, DataError>;
    /// Persist status / digest / timestamp changes on an existing edge.
    async fn update(&self, edge: &DependencyEdge) -> Result<(), DataError>;
    async fn delete(&self, id: Uuid) -> Result<bool, DataError>;
    /// Edges touching the state in either direction.
    async fn count_for_state(&self, guid: Uuid) -> Result<u64, DataError>;
}

#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user; `Conflict` on duplicate email or subject.
    async fn insert(&self, user: &User) -> Result<(), DataError>;
    async fn get(&self, id: Uuid) -> Result<Option<User>, DataError>;
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, DataError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DataError>;
    async fn list(&self) -> Result<Vec<User>, DataError>;
    async fn update_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError>;
}

#[async_trait::async_trait]
pub trait ServiceAccountRepository: Send + Sync {
    /// Insert; `Conflict` on duplicate name or client_id.
    async fn insert(&self, account: &ServiceAccount) -> Result<(), DataError>;
    async fn get(&self, id: Uuid) -> Result<Option<ServiceAccount>, DataError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<ServiceAccount>, DataError>;
    async fn find_by_client_id(&self, client_id: &str)
        -> Result<Option<ServiceAccount>, DataError>;
    async fn list(&self) -> Result<Vec<ServiceAccount>, DataError>;
    async fn update_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError>;
}

#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    /// Idempotent on the session id.
    async fn insert(&self, session: &Session) -> Result<(), DataError>;
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, DataError>;
    async fn revoke(&self, id: Uuid) -> Result<bool, DataError>;
    /// Best-effort last-used stamp; failures are the caller's to ignore.
    async fn touch(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DataError>;
}

#[async_trait::async_trait]
pub trait RevokedJtiRepository: Send + Sync {
    /// Idempotent on the jti primary key.
    async fn insert(&self, entry: &RevokedJti) -> Result<(), DataError>;
    async fn is_revoked(&self, jti: &str) -> Result<bool, DataError>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DataError>;
}

#[async_trait::async_trait]
pub trait RoleRepository: Send + Sync {
    /// Insert; `Conflict` on duplicate name.
    async fn insert(&self, role: &Role) -> Result<(), DataError>;
    async fn get(&self, id: Uuid) -> Result<Option<Role>, DataError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, DataError>;
    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Role>, DataError>;
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, DataError>;
    async fn list(&self) -> Result<Vec<Role>, DataError>;
    async fn update(&self, role: &Role) -> Result<(), DataError>;
    async fn delete(&self, id: Uuid) -> Result<bool, DataError>;
}

#[async_trait::async_trait]
pub trait RoleBindingRepository: Send + Sync {
    async fn user_roles_for(&self, principal: PrincipalRef) -> Result<Vec<UserRole>, DataError>;
    async fn insert_user_role(&self, binding: &UserRole) -> Result<(), DataError>;
    async fn delete_user_role(&self, id: Uuid) -> Result<bool, DataError>;
    /// Transactional: either every (sa, role) pair is bound or none is.
    /// Pairs that already exist are left alone.
    async fn assign_roles_to_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), DataError>;
    /// Transactional removal of the given pairs.
    async fn remove_roles_from_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), DataError>;
    async fn list_group_roles(&self) -> Result<Vec<GroupRole>, DataError>;
    async fn insert_group_role(&self, binding: &GroupRole) -> Result<(), DataError>;
    async fn delete_group_role(&self, id: Uuid) -> Result<bool, DataError>;
    /// Remove every binding (user and group) referencing the role.
    async fn delete_bindings_for_role(&self, role_id: Uuid) -> Result<u64, DataError>;
}

/// The bundle of repository handles the services are built from.
#[derive(Clone)]
pub struct Repositories {
    pub states: Arc<dyn StateRepository>,
    pub state_outputs: Arc<dyn StateOutputRepository>,
    pub edges: Arc<dyn EdgeRepository>,
    pub users: Arc<dyn UserRepository>,
    pub service_accounts: Arc<dyn ServiceAccountRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub revoked_jtis: Arc<dyn RevokedJtiRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub role_bindings: Arc<dyn RoleBindingRepository>,
}
