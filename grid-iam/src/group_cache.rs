//! The group→role cache.
//!
//! The hot authorization path resolves an external-IdP user's groups to
//! role ids without touching the database or taking a lock. A single
//! immutable snapshot lives in an atomically published reference: readers
//! load it once per authorization and see one consistent version for the
//! whole read; the refresher builds a complete replacement and publishes
//! it in one store. A failed rebuild leaves the previous snapshot live.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use grid_core::GridError;
use grid_data::RoleBindingRepository;

/// One immutable published version of the mapping.
#[derive(Debug, Default)]
pub struct GroupRoleSnapshot {
    version: u64,
    mapping: HashMap<String, HashSet<Uuid>>,
}

impl GroupRoleSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn group_count(&self) -> usize {
        self.mapping.len()
    }

    pub fn roles_for_group(&self, group: &str) -> Option<&HashSet<Uuid>> {
        self.mapping.get(group)
    }

    /// Union of role ids across the given groups.
    pub fn roles_for_groups<'a>(
        &self,
        groups: impl IntoIterator<Item = &'a str>,
    ) -> HashSet<Uuid> {
        let mut roles = HashSet::new();
        for group in groups {
            if let Some(ids) = self.mapping.get(group) {
                roles.extend(ids.iter().copied());
            }
        }
        roles
    }
}

/// Versioned, atomically published group→role mapping.
pub struct GroupRoleCache {
    current: ArcSwap<GroupRoleSnapshot>,
    /// Serializes writers; readers never touch it.
    refresh_gate: Mutex<()>,
}

impl GroupRoleCache {
    /// Starts empty at version 0; call [`refresh`](Self::refresh) once
    /// before serving authorization.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(GroupRoleSnapshot::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Lock-free load of the current snapshot. The returned handle stays
    /// consistent for as long as the caller holds it.
    pub fn snapshot(&self) -> Arc<GroupRoleSnapshot> {
        self.current.load_full()
    }

    /// Rebuild from the bindings store and publish atomically. The version
    /// strictly increases on success; on failure the previous snapshot
    /// stays live and the error is returned for the caller to log.
    pub async fn refresh(
        &self,
        bindings: &dyn RoleBindingRepository,
    ) -> Result<u64, GridError> {
        let _gate = self.refresh_gate.lock().await;

        let rows = match bindings.list_group_roles().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "group-role cache refresh failed; keeping current snapshot");
                return Err(err.into());
            }
        };

        let mut mapping: HashMap<String, HashSet<Uuid>> = HashMap::new();
        for row in rows {
            mapping.entry(row.group).or_default().insert(row.role_id);
        }

        let version = self.current.load().version + 1;
        let snapshot = GroupRoleSnapshot { version, mapping };
        debug!(version, groups = snapshot.group_count(), "group-role cache published");
        self.current.store(Arc::new(snapshot));
        Ok(version)
    }
}

impl Default for GroupRoleCache {
    fn default() -> Self {
        Self::new()
    }
}
