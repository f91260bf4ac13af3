//! Row-level entities shared by every repository backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use grid_core::id::QualifiedId;
use grid_core::labels::{LabelValue, Labels};
use grid_graph::EdgeStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to a principal row: exactly one of user / service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum PrincipalRef {
    User(Uuid),
    ServiceAccount(Uuid),
}

impl PrincipalRef {
    pub fn id(&self) -> Uuid {
        match self {
            PrincipalRef::User(id) | PrincipalRef::ServiceAccount(id) => *id,
        }
    }

    pub fn qualified(&self) -> QualifiedId {
        match self {
            PrincipalRef::User(id) => QualifiedId::user(*id),
            PrincipalRef::ServiceAccount(id) => QualifiedId::service_account(*id),
        }
    }
}

/// A human user. External-IdP users carry the upstream `subject` they were
/// JIT-provisioned from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub subject: Option<String>,
    pub email: String,
    pub display_name: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A machine principal authenticating with client credentials.
/// The secret is only ever stored as a password-KDF hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub client_secret_hash: String,
    pub description: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A resolved principal: the authenticated actor behind a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    User(User),
    ServiceAccount(ServiceAccount),
}

impl Principal {
    pub fn id(&self) -> Uuid {
        match self {
            Principal::User(u) => u.id,
            Principal::ServiceAccount(sa) => sa.id,
        }
    }

    pub fn as_ref(&self) -> PrincipalRef {
        match self {
            Principal::User(u) => PrincipalRef::User(u.id),
            Principal::ServiceAccount(sa) => PrincipalRef::ServiceAccount(sa.id),
        }
    }

    /// Canonical prefixed identifier (`user:<id>` / `sa:<id>`).
    pub fn qualified_id(&self) -> QualifiedId {
        self.as_ref().qualified()
    }

    pub fn display_name(&self) -> &str {
        match self {
            Principal::User(u) => &u.display_name,
            Principal::ServiceAccount(sa) => &sa.name,
        }
    }

    pub fn disabled(&self) -> bool {
        match self {
            Principal::User(u) => u.disabled,
            Principal::ServiceAccount(sa) => sa.disabled,
        }
    }

    /// Upstream IdP subject, present for external-IdP users.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Principal::User(u) => u.subject.as_deref(),
            Principal::ServiceAccount(_) => None,
        }
    }
}

/// A bearer session. The token itself is never stored; only its SHA-256
/// hex digest is, so a leaked sessions table cannot be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub principal: PrincipalRef,
    pub token_hash: String,
    /// Group memberships delivered by the IdP at login; resolved through
    /// the group→role cache on each request.
    pub groups: Vec<String>,
    pub upstream_refresh_token: Option<String>,
    pub upstream_id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Denylist entry for a revoked JWT id. Rows expire with the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokedJti {
    pub jti: String,
    pub subject: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: String,
}

/// Allowed values for one label key when a role creates a state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateConstraint {
    pub allowed_values: Vec<LabelValue>,
    pub required: bool,
}

/// A named bundle of permissions.
///
/// `scope_expr` is a label predicate (empty = unrestricted); `actions`
/// lists the action patterns the role grants (`*` and `prefix:*`
/// wildcards); `version` bumps on every update so cached derivations can
/// tell stale data apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub scope_expr: String,
    pub actions: Vec<String>,
    pub create_constraints: BTreeMap<String, CreateConstraint>,
    pub immutable_keys: Vec<String>,
    pub version: i64,
    pub system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direct role binding for a user or service account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: Uuid,
    pub principal: PrincipalRef,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Role binding for an external-IdP group name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRole {
    pub id: Uuid,
    pub group: String,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Terraform's lock metadata, serialized with the exact field names the
/// HTTP backend protocol uses. `owner_principal_id` is grid-internal and
/// never crosses the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Operation", default)]
    pub operation: String,
    #[serde(rename = "Info", default)]
    pub info: String,
    #[serde(rename = "Who", default)]
    pub who: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Created", default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(skip)]
    pub owner_principal_id: Option<Uuid>,
}

impl LockInfo {
    /// The wire JSON Terraform expects on a 423 and in lock queries.
    pub fn wire_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A state object: an opaque Terraform/OpenTofu state blob plus metadata.
///
/// The `locked ⇔ lock present` invariant is structural: there is no
/// separate boolean to fall out of sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub guid: Uuid,
    pub logic_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    pub labels: Labels,
    pub lock: Option<LockInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn content_len(&self) -> usize {
        self.content.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Where a state-output schema came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaSource {
    Manual,
    Inferred,
}

/// Result of the most recent schema validation of an output value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Error,
}

/// One output exposed by a producer state, tracked per push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateOutput {
    pub state_guid: Uuid,
    pub output_key: String,
    pub sensitive: bool,
    pub state_serial: i64,
    pub schema: Option<serde_json::Value>,
    pub schema_source: SchemaSource,
    pub validation_status: ValidationStatus,
    pub last_validated_at: Option<DateTime<Utc>>,
}

/// A directed dependency from a producer state's output to a consumer
/// state's named input. `(from_state, from_output, to_state)` is unique;
/// self-loops are rejected before rows are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: Uuid,
    pub from_state: Uuid,
    pub from_output: String,
    pub to_state: Uuid,
    pub to_input_name: String,
    pub status: EdgeStatus,
    pub in_digest: Option<String>,
    pub out_digest: Option<String>,
    pub mock_value: Option<serde_json::Value>,
    pub last_in_at: Option<DateTime<Utc>>,
    pub last_out_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
