//! The state service: validation, CRUD, and the Terraform locking
//! protocol over the repository's compare-and-set primitives.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use grid_core::expr::Expr;
use grid_core::labels::Labels;
use grid_core::GridError;
use grid_data::{
    LockInfo, LockOutcome, Repositories, Role, StateRecord, UnlockOutcome,
};

use crate::outputs::refresh_outputs;
use crate::policy::LabelPolicy;

/// Longest allowed `logic_id`.
pub const MAX_LOGIC_ID_LEN: usize = 128;

/// State blobs above this size trigger the (non-fatal) size warning.
pub const SIZE_WARNING_BYTES: usize = 10 * 1024 * 1024;

/// The three URLs a Terraform client needs to use a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub address: String,
    pub lock_address: String,
    pub unlock_address: String,
}

/// Listing row; labels are attached only when asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub guid: Uuid,
    pub logic_id: String,
    pub locked: bool,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

/// What a content update reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The blob exceeded [`SIZE_WARNING_BYTES`]; the write still succeeded.
    pub size_warning: bool,
}

pub struct StateService {
    repos: Repositories,
    policy: Arc<dyn LabelPolicy>,
    server_url: String,
}

impl StateService {
    pub fn new(repos: Repositories, policy: Arc<dyn LabelPolicy>, server_url: impl Into<String>) -> Self {
        Self {
            repos,
            policy,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a state and hand back the backend configuration Terraform
    /// needs. The GUID is client-supplied (so the CLI can pre-render
    /// backend blocks) and must be a UUID.
    pub async fn create_state(
        &self,
        guid: &str,
        logic_id: &str,
        labels: Labels,
        roles: &[Role],
    ) -> Result<BackendConfig, GridError> {
        let guid: Uuid = guid
            .parse()
            .map_err(|_| GridError::invalid_argument(format!("'{guid}' is not a valid UUID")))?;
        validate_logic_id(logic_id)?;
        self.policy
            .validate(&labels)
            .await
            .map_err(|v| GridError::invalid_argument(v.to_string()))?;
        grid_authz::check_create(roles, &labels)?;

        let now = Utc::now();
        let state = StateRecord {
            guid,
            logic_id: logic_id.to_string(),
            content: None,
            labels,
            lock: None,
            created_at: now,
            updated_at: now,
        };
        match self.repos.states.create(&state).await {
            Ok(()) => {}
            Err(grid_data::DataError::Conflict(what)) => {
                return Err(GridError::already_exists(what))
            }
            Err(err) => return Err(err.into()),
        }
        info!(%guid, logic_id, "state created");
        Ok(self.backend_config(guid))
    }

    /// List states, optionally filtered by a label expression.
    pub async fn list_states(
        &self,
        filter: Option<&str>,
        include_labels: bool,
    ) -> Result<Vec<StateSummary>, GridError> {
        let filter = match filter {
            Some(text) => Expr::parse(text)
                .map_err(|e| GridError::invalid_argument(format!("filter: {e}")))?,
            None => Expr::True,
        };
        let states = self.repos.states.list().await?;
        Ok(states
            .into_iter()
            .filter(|s| filter.evaluate(&s.labels))
            .map(|s| StateSummary {
                guid: s.guid,
                logic_id: s.logic_id.clone(),
                locked: s.locked(),
                size: s.content_len(),
                labels: include_labels.then_some(s.labels),
            })
            .collect())
    }

    /// Resolve a logic id to its GUID and backend configuration.
    pub async fn get_state_config(
        &self,
        logic_id: &str,
    ) -> Result<(Uuid, BackendConfig), GridError> {
        let state = self
            .repos
            .states
            .get_by_logic_id(logic_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("state '{logic_id}'")))?;
        Ok((state.guid, self.backend_config(state.guid)))
    }

    pub async fn get_state_by_guid(&self, guid: Uuid) -> Result<StateRecord, GridError> {
        self.repos
            .states
            .get(guid)
            .await?
            .ok_or_else(|| GridError::not_found(format!("state {guid}")))
    }

    /// Resolve a reference that may be a GUID or a logic id.
    pub async fn resolve_ref(&self, state_ref: &str) -> Result<StateRecord, GridError> {
        if let Ok(guid) = state_ref.parse::<Uuid>() {
            if let Some(state) = self.repos.states.get(guid).await? {
                return Ok(state);
            }
        }
        self.repos
            .states
            .get_by_logic_id(state_ref)
            .await?
            .ok_or_else(|| GridError::not_found(format!("state '{state_ref}'")))
    }

    pub async fn get_state_lock(&self, guid: Uuid) -> Result<Option<LockInfo>, GridError> {
        Ok(self.get_state_by_guid(guid).await?.lock)
    }

    /// Acquire the exclusive lock. Fails with `locked` (carrying the
    /// holder's metadata verbatim) when someone already holds it.
    pub async fn lock_state(&self, guid: Uuid, mut lock: LockInfo) -> Result<LockInfo, GridError> {
        if lock.id.is_empty() {
            return Err(GridError::invalid_argument("lock id is empty"));
        }
        if lock.created.is_none() {
            lock.created = Some(Utc::now());
        }
        match self.repos.states.try_lock(guid, &lock).await? {
            LockOutcome::Acquired => {
                info!(%guid, lock_id = %lock.id, who = %lock.who, "state locked");
                Ok(lock)
            }
            LockOutcome::Held(holder) => Err(GridError::locked(
                format!("state {guid}"),
                Some(holder.wire_json()),
            )),
        }
    }

    /// Release the lock. The presented id must match the holder's.
    pub async fn unlock_state(&self, guid: Uuid, lock_id: &str) -> Result<(), GridError> {
        if lock_id.is_empty() {
            return Err(GridError::invalid_argument("lock id is empty"));
        }
        match self.repos.states.unlock(guid, lock_id).await? {
            UnlockOutcome::Unlocked => {
                info!(%guid, lock_id, "state unlocked");
                Ok(())
            }
            UnlockOutcome::NotLocked => Err(GridError::failed_precondition(format!(
                "state {guid} is not locked"
            ))),
            UnlockOutcome::IdMismatch => Err(GridError::invalid_argument(format!(
                "lock id '{lock_id}' does not match the current holder"
            ))),
        }
    }

    /// Replace the state blob. A locked state requires the matching lock
    /// id; the lock holder is the only writer.
    pub async fn update_state_content(
        &self,
        guid: Uuid,
        content: &[u8],
        lock_id: Option<&str>,
    ) -> Result<UpdateOutcome, GridError> {
        if content.is_empty() {
            return Err(GridError::invalid_argument("state content is empty"));
        }
        let state = self.get_state_by_guid(guid).await?;
        if let Some(holder) = &state.lock {
            if lock_id != Some(holder.id.as_str()) {
                return Err(GridError::locked(
                    format!("state {guid}"),
                    Some(holder.wire_json()),
                ));
            }
        }

        self.repos.states.update_content(guid, content).await?;
        let size_warning = content.len() > SIZE_WARNING_BYTES;
        if size_warning {
            debug!(%guid, bytes = content.len(), "state exceeds the size-warning threshold");
        }

        // Derived outputs and edge digests follow every push.
        refresh_outputs(&self.repos, &state, content).await?;

        Ok(UpdateOutcome { size_warning })
    }

    pub async fn get_state_content(&self, guid: Uuid) -> Result<Option<Vec<u8>>, GridError> {
        Ok(self.get_state_by_guid(guid).await?.content)
    }

    /// Replace the label map. Policy-checked; immutable-key rules are
    /// enforced against the caller's roles.
    pub async fn update_state_labels(
        &self,
        guid: Uuid,
        labels: Labels,
        roles: &[Role],
    ) -> Result<StateRecord, GridError> {
        self.policy
            .validate(&labels)
            .await
            .map_err(|v| GridError::invalid_argument(v.to_string()))?;
        let state = self.get_state_by_guid(guid).await?;
        grid_authz::check_label_update(roles, &state.labels, &labels)?;
        self.repos.states.update_labels(guid, &labels).await?;
        self.get_state_by_guid(guid).await
    }

    /// Delete a state. Locked states and states still referenced by
    /// dependency edges are refused.
    pub async fn delete_state(&self, guid: Uuid) -> Result<(), GridError> {
        let state = self.get_state_by_guid(guid).await?;
        if state.locked() {
            return Err(GridError::failed_precondition(format!(
                "state {guid} is locked"
            )));
        }
        let edges = self.repos.edges.count_for_state(guid).await?;
        if edges > 0 {
            return Err(GridError::failed_precondition(format!(
                "state {guid} participates in {edges} dependency edge(s)"
            )));
        }
        self.repos.states.delete(guid).await?;
        info!(%guid, logic_id = %state.logic_id, "state deleted");
        Ok(())
    }

    fn backend_config(&self, guid: Uuid) -> BackendConfig {
        let address = format!("{}/tfstate/{guid}", self.server_url);
        BackendConfig {
            lock_address: format!("{address}/lock"),
            unlock_address: format!("{address}/unlock"),
            address,
        }
    }
}

fn validate_logic_id(logic_id: &str) -> Result<(), GridError> {
    if logic_id.is_empty() {
        return Err(GridError::invalid_argument("logic_id is empty"));
    }
    if logic_id.len() > MAX_LOGIC_ID_LEN {
        return Err(GridError::invalid_argument(format!(
            "logic_id is {} chars, max {MAX_LOGIC_ID_LEN}",
            logic_id.len()
        )));
    }
    Ok(())
}
