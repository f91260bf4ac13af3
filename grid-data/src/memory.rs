//! DashMap-backed repositories for development and tests.
//!
//! These enforce the same uniqueness and compare-and-set semantics as the
//! SQL layer, so services behave identically under `memory://` and
//! PostgreSQL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::entities::{
    DependencyEdge, GroupRole, LockInfo, PrincipalRef, RevokedJti, Role, ServiceAccount, Session,
    StateOutput, StateRecord, User, UserRole,
};
use crate::error::DataError;
use crate::repos::{
    EdgeRepository, LockOutcome, Repositories, RevokedJtiRepository, RoleBindingRepository,
    RoleRepository, ServiceAccountRepository, SessionRepository, StateOutputRepository,
    StateRepository, UnlockOutcome, UserRepository,
};
use grid_core::labels::Labels;

/// Build a [`Repositories`] bundle backed entirely by memory.
pub struct InMemoryRepositories;

impl InMemoryRepositories {
    pub fn new() -> Repositories {
        Repositories {
            states: Arc::new(InMemoryStateRepository::default()),
            state_outputs: Arc::new(InMemoryStateOutputRepository::default()),
            edges: Arc::new(InMemoryEdgeRepository::default()),
            users: Arc::new(InMemoryUserRepository::default()),
            service_accounts: Arc::new(InMemoryServiceAccountRepository::default()),
            sessions: Arc::new(InMemorySessionRepository::default()),
            revoked_jtis: Arc::new(InMemoryRevokedJtiRepository::default()),
            roles: Arc::new(InMemoryRoleRepository::default()),
            role_bindings: Arc::new(InMemoryRoleBindingRepository::default()),
        }
    }
}

// ── states ──

#[derive(Default)]
pub struct InMemoryStateRepository {
    states: DashMap<Uuid, StateRecord>,
    by_logic_id: DashMap<String, Uuid>,
}

#[async_trait::async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn create(&self, state: &StateRecord) -> Result<(), DataError> {
        match self.by_logic_id.entry(state.logic_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(DataError::Conflict(format!(
                    "state with logic_id '{}'",
                    state.logic_id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                if self.states.contains_key(&state.guid) {
                    return Err(DataError::Conflict(format!("state {}", state.guid)));
                }
                slot.insert(state.guid);
            }
        }
        self.states.insert(state.guid, state.clone());
        Ok(())
    }

    async fn get(&self, guid: Uuid) -> Result<Option<StateRecord>, DataError> {
        Ok(self.states.get(&guid).map(|s| s.value().clone()))
    }

    async fn get_by_logic_id(&self, logic_id: &str) -> Result<Option<StateRecord>, DataError> {
        let Some(guid) = self.by_logic_id.get(logic_id).map(|g| *g) else {
            return Ok(None);
        };
        self.get(guid).await
    }

    async fn list(&self) -> Result<Vec<StateRecord>, DataError> {
        let mut all: Vec<StateRecord> =
            self.states.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| a.logic_id.cmp(&b.logic_id));
        Ok(all)
    }

    async fn update_content(&self, guid: Uuid, content: &[u8]) -> Result<(), DataError> {
        let mut state = self
            .states
            .get_mut(&guid)
            .ok_or_else(|| DataError::NotFound(format!("state {guid}")))?;
        state.content = Some(content.to_vec());
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn update_labels(&self, guid: Uuid, labels: &Labels) -> Result<(), DataError> {
        let mut state = self
            .states
            .get_mut(&guid)
            .ok_or_else(|| DataError::NotFound(format!("state {guid}")))?;
        state.labels = labels.clone();
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn try_lock(&self, guid: Uuid, lock: &LockInfo) -> Result<LockOutcome, DataError> {
        let mut state = self
            .states
            .get_mut(&guid)
            .ok_or_else(|| DataError::NotFound(format!("state {guid}")))?;
        if let Some(holder) = &state.lock {
            return Ok(LockOutcome::Held(holder.clone()));
        }
        state.lock = Some(lock.clone());
        state.updated_at = Utc::now();
        Ok(LockOutcome::Acquired)
    }

    async fn unlock(&self, guid: Uuid, lock_id: &str) -> Result<UnlockOutcome, DataError> {
        let mut state = self
            .states
            .get_mut(&guid)
            .ok_or_else(|| DataError::NotFound(format!("state {guid}")))?;
        match &state.lock {
            None => Ok(UnlockOutcome::NotLocked),
            Some(holder) if holder.id != lock_id => Ok(UnlockOutcome::IdMismatch),
            Some(_) => {
                state.lock = None;
                state.updated_at = Utc::now();
                Ok(UnlockOutcome::Unlocked)
            }
        }
    }

    async fn delete(&self, guid: Uuid) -> Result<bool, DataError> {
        match self.states.remove(&guid) {
            Some((_, state)) => {
                self.by_logic_id.remove(&state.logic_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ── state outputs ──

#[derive(Default)]
pub struct InMemoryStateOutputRepository {
    outputs: DashMap<(Uuid, String), StateOutput>,
}

#[async_trait::async_trait]
impl StateOutputRepository for InMemoryStateOutputRepository {
    async fn upsert(&self, output: &StateOutput) -> Result<(), DataError> {
        self.outputs.insert(
            (output.state_guid, output.output_key.clone()),
            output.clone(),
        );
        Ok(())
    }

    async fn get(&self, state: Uuid, key: &str) -> Result<Option<StateOutput>, DataError> {
        Ok(self
            .outputs
            .get(&(state, key.to_string()))
            .map(|o| o.value().clone()))
    }

    async fn list_for_state(&self, state: Uuid) -> Result<Vec<StateOutput>, DataError> {
        let mut found: Vec<StateOutput> = self
            .outputs
            .iter()
            .filter(|entry| entry.key().0 == state)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.output_key.cmp(&b.output_key));
        Ok(found)
    }

    async fn delete(&self, state: Uuid, key: &str) -> Result<bool, DataError> {
        Ok(self.outputs.remove(&(state, key.to_string())).is_some())
    }
}

// ── edges ──

#[derive(Default)]
pub struct InMemoryEdgeRepository {
    edges: DashMap<Uuid, DependencyEdge>,
    by_triple: DashMap<(Uuid, String, Uuid), Uuid>,
}

#[async_trait::async_trait]
impl EdgeRepository for InMemoryEdgeRepository {
    async fn insert(&self, edge: &DependencyEdge) -> Result<(), DataError> {
        let triple = (edge.from_state, edge.from_output.clone(), edge.to_state);
        match self.by_triple.entry(triple) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DataError::Conflict(format!(
                "edge {} -[{}]-> {}",
                edge.from_state, edge.from_output, edge.to_state
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(edge.id);
                self.edges.insert(edge.id, edge.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<DependencyEdge>, DataError> {
        Ok(self.edges.get(&id).map(|e| e.value().clone()))
    }

    async fn find(
        &self,
        from: Uuid,
        from_output: &str,
        to: Uuid,
    ) -> Result<Option<DependencyEdge>, DataError> {
        let Some(id) = self
            .by_triple
            .get(&(from, from_output.to_string(), to))
            .map(|id| *id)
        else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn list_incoming(&self, to: Uuid) -> Result<Vec<DependencyEdge>, DataError> {
        Ok(self.collect(|e| e.to_state == to))
    }

    async fn list_outgoing(&self, from: Uuid) -> Result<Vec<DependencyEdge>, DataError> {
        Ok(self.collect(|e| e.from_state == from))
    }

    async fn list_all(&self) -> Result<Vec<DependencyEdge>, DataError> {
        Ok(self.collect(|_| true))
    }

    async fn search_by_output(&self, output_key: &str) -> Result<Vec<DependencyEdge>, DataError> {
        Ok(self.collect(|e| e.from_output == output_key))
    }

    async fn update(&self, edge: &DependencyEdge) -> Result<(), DataError> {
        let mut existing = self
            .edges
            .get_mut(&edge.id)
            .ok_or_else(|| DataError::NotFound(format!("edge {}", edge.id)))?;
        *existing = edge.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DataError> {
        match self.edges.remove(&id) {
            Some((_, edge)) => {
                self.by_triple
                    .remove(&(edge.from_state, edge.from_output.clone(), edge.to_state));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_for_state(&self, guid: Uuid) -> Result<u64, DataError> {
        Ok(self
            .edges
            .iter()
            .filter(|e| e.from_state == guid || e.to_state == guid)
            .count() as u64)
    }
}

impl InMemoryEdgeRepository {
    fn collect(&self, keep: impl Fn(&DependencyEdge) -> bool) -> Vec<DependencyEdge> {
        let mut found: Vec<DependencyEdge> = self
            .edges
            .iter()
            .filter(|entry| keep(entry))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        found
    }
}

// ── users ──

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
    by_subject: DashMap<String, Uuid>,
    by_email: DashMap<String, Uuid>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, user: &User) -> Result<(), DataError> {
        if self.by_email.contains_key(&user.email) {
            return Err(DataError::Conflict(format!("user email '{}'", user.email)));
        }
        if let Some(subject) = &user.subject {
            match self.by_subject.entry(subject.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(DataError::Conflict(format!("user subject '{subject}'")))
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(user.id);
                }
            }
        }
        self.by_email.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DataError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, DataError> {
        let Some(id) = self.by_subject.get(subject).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        let Some(id) = self.by_email.get(email).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn list(&self) -> Result<Vec<User>, DataError> {
        let mut all: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        all.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(all)
    }

    async fn update_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| DataError::NotFound(format!("user {id}")))?;
        user.last_used_at = Some(when);
        Ok(())
    }
}

// ── service accounts ──

#[derive(Default)]
pub struct InMemoryServiceAccountRepository {
    accounts: DashMap<Uuid, ServiceAccount>,
    by_name: DashMap<String, Uuid>,
    by_client_id: DashMap<String, Uuid>,
}

#[async_trait::async_trait]
impl ServiceAccountRepository for InMemoryServiceAccountRepository {
    async fn insert(&self, account: &ServiceAccount) -> Result<(), DataError> {
        if self.by_name.contains_key(&account.name) {
            return Err(DataError::Conflict(format!(
                "service account '{}'",
                account.name
            )));
        }
        if self.by_client_id.contains_key(&account.client_id) {
            return Err(DataError::Conflict(format!(
                "service account client_id '{}'",
                account.client_id
            )));
        }
        self.by_name.insert(account.name.clone(), account.id);
        self.by_client_id
            .insert(account.client_id.clone(), account.id);
        self.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ServiceAccount>, DataError> {
        Ok(self.accounts.get(&id).map(|a| a.value().clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ServiceAccount>, DataError> {
        let Some(id) = self.by_name.get(name).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<ServiceAccount>, DataError> {
        let Some(id) = self.by_client_id.get(client_id).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn list(&self) -> Result<Vec<ServiceAccount>, DataError> {
        let mut all: Vec<ServiceAccount> = self.accounts.iter().map(|a| a.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn update_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError> {
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| DataError::NotFound(format!("service account {id}")))?;
        account.last_used_at = Some(when);
        Ok(())
    }
}

// ── sessions ──

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: DashMap<Uuid, Session>,
    by_token_hash: DashMap<String, Uuid>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), DataError> {
        self.by_token_hash
            .insert(session.token_hash.clone(), session.id);
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, DataError> {
        let Some(id) = self.by_token_hash.get(token_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn revoke(&self, id: Uuid) -> Result<bool, DataError> {
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| DataError::NotFound(format!("session {id}")))?;
        session.last_used_at = Some(when);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DataError> {
        let expired: Vec<(Uuid, String)> = self
            .sessions
            .iter()
            .filter(|s| s.expired(now))
            .map(|s| (s.id, s.token_hash.clone()))
            .collect();
        for (id, hash) in &expired {
            self.sessions.remove(id);
            self.by_token_hash.remove(hash);
        }
        Ok(expired.len() as u64)
    }
}

// ── revoked JTIs ──

#[derive(Default)]
pub struct InMemoryRevokedJtiRepository {
    entries: DashMap<String, RevokedJti>,
}

#[async_trait::async_trait]
impl RevokedJtiRepository for InMemoryRevokedJtiRepository {
    async fn insert(&self, entry: &RevokedJti) -> Result<(), DataError> {
        self.entries.insert(entry.jti.clone(), entry.clone());
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, DataError> {
        Ok(self.entries.contains_key(jti))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DataError> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.jti.clone())
            .collect();
        for jti in &expired {
            self.entries.remove(jti);
        }
        Ok(expired.len() as u64)
    }
}

// ── roles ──

#[derive(Default)]
pub struct InMemoryRoleRepository {
    roles: DashMap<Uuid, Role>,
    by_name: DashMap<String, Uuid>,
}

#[async_trait::async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn insert(&self, role: &Role) -> Result<(), DataError> {
        match self.by_name.entry(role.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DataError::Conflict(format!("role '{}'", role.name)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(role.id);
                self.roles.insert(role.id, role.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Role>, DataError> {
        Ok(self.roles.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, DataError> {
        let Some(id) = self.by_name.get(name).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Role>, DataError> {
        let mut found = Vec::new();
        for name in names {
            if let Some(role) = self.find_by_name(name).await? {
                found.push(role);
            }
        }
        Ok(found)
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, DataError> {
        let mut found = Vec::new();
        for id in ids {
            if let Some(role) = self.get(*id).await? {
                found.push(role);
            }
        }
        Ok(found)
    }

    async fn list(&self) -> Result<Vec<Role>, DataError> {
        let mut all: Vec<Role> = self.roles.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn update(&self, role: &Role) -> Result<(), DataError> {
        let mut existing = self
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| DataError::NotFound(format!("role {}", role.id)))?;
        if existing.name != role.name {
            self.by_name.remove(&existing.name);
            self.by_name.insert(role.name.clone(), role.id);
        }
        *existing = role.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DataError> {
        match self.roles.remove(&id) {
            Some((_, role)) => {
                self.by_name.remove(&role.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ── role bindings ──

#[derive(Default)]
pub struct InMemoryRoleBindingRepository {
    user_roles: DashMap<Uuid, UserRole>,
    group_roles: DashMap<Uuid, GroupRole>,
}

#[async_trait::async_trait]
impl RoleBindingRepository for InMemoryRoleBindingRepository {
    async fn user_roles_for(&self, principal: PrincipalRef) -> Result<Vec<UserRole>, DataError> {
        let mut found: Vec<UserRole> = self
            .user_roles
            .iter()
            .filter(|b| b.principal == principal)
            .map(|b| b.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn insert_user_role(&self, binding: &UserRole) -> Result<(), DataError> {
        self.user_roles.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn delete_user_role(&self, id: Uuid) -> Result<bool, DataError> {
        Ok(self.user_roles.remove(&id).is_some())
    }

    async fn assign_roles_to_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), DataError> {
        let principal = PrincipalRef::ServiceAccount(service_account_id);
        let existing: Vec<Uuid> = self
            .user_roles
            .iter()
            .filter(|b| b.principal == principal)
            .map(|b| b.role_id)
            .collect();
        for role_id in role_ids {
            if existing.contains(role_id) {
                continue;
            }
            let binding = UserRole {
                id: Uuid::now_v7(),
                principal,
                role_id: *role_id,
                created_at: Utc::now(),
            };
            self.user_roles.insert(binding.id, binding);
        }
        Ok(())
    }

    async fn remove_roles_from_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), DataError> {
        let principal = PrincipalRef::ServiceAccount(service_account_id);
        let doomed: Vec<Uuid> = self
            .user_roles
            .iter()
            .filter(|b| b.principal == principal && role_ids.contains(&b.role_id))
            .map(|b| b.id)
            .collect();
        for id in doomed {
            self.user_roles.remove(&id);
        }
        Ok(())
    }

    async fn list_group_roles(&self) -> Result<Vec<GroupRole>, DataError> {
        let mut all: Vec<GroupRole> = self.group_roles.iter().map(|b| b.value().clone()).collect();
        all.sort_by(|a, b| a.group.cmp(&b.group));
        Ok(all)
    }

    async fn insert_group_role(&self, binding: &GroupRole) -> Result<(), DataError> {
        self.group_roles.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn delete_group_role(&self, id: Uuid) -> Result<bool, DataError> {
        Ok(self.group_roles.remove(&id).is_some())
    }

    async fn delete_bindings_for_role(&self, role_id: Uuid) -> Result<u64, DataError> {
        let doomed_users: Vec<Uuid> = self
            .user_roles
            .iter()
            .filter(|b| b.role_id == role_id)
            .map(|b| b.id)
            .collect();
        let doomed_groups: Vec<Uuid> = self
            .group_roles
            .iter()
            .filter(|b| b.role_id == role_id)
            .map(|b| b.id)
            .collect();
        for id in &doomed_users {
            self.user_roles.remove(id);
        }
        for id in &doomed_groups {
            self.group_roles.remove(id);
        }
        Ok((doomed_users.len() + doomed_groups.len()) as u64)
    }
}
