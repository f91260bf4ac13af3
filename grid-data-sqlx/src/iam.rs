//! The IAM tables: users, service accounts, sessions, the JTI denylist,
//! roles and role bindings.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use grid_data::{
    DataError, GroupRole, PrincipalRef, RevokedJti, RevokedJtiRepository, Role,
    RoleBindingRepository, RoleRepository, ServiceAccount, ServiceAccountRepository, Session,
    SessionRepository, User, UserRepository, UserRole,
};

use crate::rows::map_err;

fn principal_from_columns(
    user_id: Option<Uuid>,
    service_account_id: Option<Uuid>,
    table: &str,
) -> Result<PrincipalRef, DataError> {
    match (user_id, service_account_id) {
        (Some(id), None) => Ok(PrincipalRef::User(id)),
        (None, Some(id)) => Ok(PrincipalRef::ServiceAccount(id)),
        _ => Err(DataError::Other(format!(
            "{table}: exactly one of user_id/service_account_id must be set"
        ))),
    }
}

fn principal_to_columns(principal: PrincipalRef) -> (Option<Uuid>, Option<Uuid>) {
    match principal {
        PrincipalRef::User(id) => (Some(id), None),
        PrincipalRef::ServiceAccount(id) => (None, Some(id)),
    }
}

// ── users ──

pub struct SqlxUserRepository {
    pool: PgPool,
}

impl SqlxUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, subject, email, display_name, disabled, created_at, last_used_at";

fn user_from_row(row: &PgRow) -> Result<User, DataError> {
    Ok(User {
        id: row.try_get("id").map_err(DataError::database)?,
        subject: row.try_get("subject").map_err(DataError::database)?,
        email: row.try_get("email").map_err(DataError::database)?,
        display_name: row.try_get("display_name").map_err(DataError::database)?,
        disabled: row.try_get("disabled").map_err(DataError::database)?,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
        last_used_at: row.try_get("last_used_at").map_err(DataError::database)?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlxUserRepository {
    async fn insert(&self, user: &User) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO users (id, subject, email, display_name, disabled, created_at, last_used_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id)
        .bind(&user.subject)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.disabled)
        .bind(user.created_at)
        .bind(user.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err(&format!("user '{}'", user.email), e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DataError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::database)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE subject = $1"
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<User>, DataError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY email"))
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::database)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn update_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError> {
        let result = sqlx::query("UPDATE users SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(when)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

// ── service accounts ──

pub struct SqlxServiceAccountRepository {
    pool: PgPool,
}

impl SqlxServiceAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, name, client_id, client_secret_hash, description, disabled, created_at, last_used_at";

fn account_from_row(row: &PgRow) -> Result<ServiceAccount, DataError> {
    Ok(ServiceAccount {
        id: row.try_get("id").map_err(DataError::database)?,
        name: row.try_get("name").map_err(DataError::database)?,
        client_id: row.try_get("client_id").map_err(DataError::database)?,
        client_secret_hash: row
            .try_get("client_secret_hash")
            .map_err(DataError::database)?,
        description: row.try_get("description").map_err(DataError::database)?,
        disabled: row.try_get("disabled").map_err(DataError::database)?,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
        last_used_at: row.try_get("last_used_at").map_err(DataError::database)?,
    })
}

#[async_trait::async_trait]
impl ServiceAccountRepository for SqlxServiceAccountRepository {
    async fn insert(&self, account: &ServiceAccount) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO service_accounts \
             (id, name, client_id, client_secret_hash, description, disabled, created_at, last_used_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.client_id)
        .bind(&account.client_secret_hash)
        .bind(&account.description)
        .bind(account.disabled)
        .bind(account.created_at)
        .bind(account.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err(&format!("service account '{}'", account.name), e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ServiceAccount>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM service_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ServiceAccount>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM service_accounts WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<ServiceAccount>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM service_accounts WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<ServiceAccount>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM service_accounts ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn update_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError> {
        let result = sqlx::query("UPDATE service_accounts SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(when)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("service account {id}")));
        }
        Ok(())
    }
}

// ── sessions ──

pub struct SqlxSessionRepository {
    pool: PgPool,
}

impl SqlxSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, user_id, service_account_id, token_hash, groups, \
     upstream_refresh_token, upstream_id_token, expires_at, user_agent, ip, revoked, \
     created_at, last_used_at";

fn session_from_row(row: &PgRow) -> Result<Session, DataError> {
    let principal = principal_from_columns(
        row.try_get("user_id").map_err(DataError::database)?,
        row.try_get("service_account_id").map_err(DataError::database)?,
        "sessions",
    )?;
    Ok(Session {
        id: row.try_get("id").map_err(DataError::database)?,
        principal,
        token_hash: row.try_get("token_hash").map_err(DataError::database)?,
        groups: row.try_get("groups").map_err(DataError::database)?,
        upstream_refresh_token: row
            .try_get("upstream_refresh_token")
            .map_err(DataError::database)?,
        upstream_id_token: row
            .try_get("upstream_id_token")
            .map_err(DataError::database)?,
        expires_at: row.try_get("expires_at").map_err(DataError::database)?,
        user_agent: row.try_get("user_agent").map_err(DataError::database)?,
        ip: row.try_get("ip").map_err(DataError::database)?,
        revoked: row.try_get("revoked").map_err(DataError::database)?,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
        last_used_at: row.try_get("last_used_at").map_err(DataError::database)?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), DataError> {
        let (user_id, service_account_id) = principal_to_columns(session.principal);
        sqlx::query(
            "INSERT INTO sessions (id, user_id, service_account_id, token_hash, groups, \
             upstream_refresh_token, upstream_id_token, expires_at, user_agent, ip, revoked, \
             created_at, last_used_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(session.id)
        .bind(user_id)
        .bind(service_account_id)
        .bind(&session.token_hash)
        .bind(&session.groups)
        .bind(&session.upstream_refresh_token)
        .bind(&session.upstream_id_token)
        .bind(session.expires_at)
        .bind(&session.user_agent)
        .bind(&session.ip)
        .bind(session.revoked)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err(&format!("session {}", session.id), e))?;
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn revoke(&self, id: Uuid) -> Result<bool, DataError> {
        let result = sqlx::query("UPDATE sessions SET revoked = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), DataError> {
        sqlx::query("UPDATE sessions SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(when)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DataError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected())
    }
}

// ── revoked JTIs ──

pub struct SqlxRevokedJtiRepository {
    pool: PgPool,
}

impl SqlxRevokedJtiRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RevokedJtiRepository for SqlxRevokedJtiRepository {
    async fn insert(&self, entry: &RevokedJti) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO revoked_jti (jti, subject, expires_at, revoked_at, revoked_by) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (jti) DO NOTHING",
        )
        .bind(&entry.jti)
        .bind(&entry.subject)
        .bind(entry.expires_at)
        .bind(entry.revoked_at)
        .bind(&entry.revoked_by)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, DataError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM revoked_jti WHERE jti = $1")
                .bind(jti)
                .fetch_optional(&self.pool)
                .await
                .map_err(DataError::database)?;
        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DataError> {
        let result = sqlx::query("DELETE FROM revoked_jti WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected())
    }
}

// ── roles ──

pub struct SqlxRoleRepository {
    pool: PgPool,
}

impl SqlxRoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ROLE_COLUMNS: &str = "id, name, description, scope_expr, actions, create_constraints, \
     immutable_keys, version, system, created_at, updated_at";

fn role_from_row(row: &PgRow) -> Result<Role, DataError> {
    let constraints: serde_json::Value =
        row.try_get("create_constraints").map_err(DataError::database)?;
    Ok(Role {
        id: row.try_get("id").map_err(DataError::database)?,
        name: row.try_get("name").map_err(DataError::database)?,
        description: row.try_get("description").map_err(DataError::database)?,
        scope_expr: row.try_get("scope_expr").map_err(DataError::database)?,
        actions: row.try_get("actions").map_err(DataError::database)?,
        create_constraints: serde_json::from_value(constraints)
            .map_err(|e| DataError::Other(format!("roles.create_constraints: {e}")))?,
        immutable_keys: row.try_get("immutable_keys").map_err(DataError::database)?,
        version: row.try_get("version").map_err(DataError::database)?,
        system: row.try_get("system").map_err(DataError::database)?,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
        updated_at: row.try_get("updated_at").map_err(DataError::database)?,
    })
}

fn constraints_json(role: &Role) -> Result<serde_json::Value, DataError> {
    serde_json::to_value(&role.create_constraints)
        .map_err(|e| DataError::Other(format!("create_constraints encode: {e}")))
}

#[async_trait::async_trait]
impl RoleRepository for SqlxRoleRepository {
    async fn insert(&self, role: &Role) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO roles (id, name, description, scope_expr, actions, create_constraints, \
             immutable_keys, version, system, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.scope_expr)
        .bind(&role.actions)
        .bind(constraints_json(role)?)
        .bind(&role.immutable_keys)
        .bind(role.version)
        .bind(role.system)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err(&format!("role '{}'", role.name), e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Role>, DataError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::database)?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, DataError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::database)?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_by_names(&self, names: &[String]) -> Result<Vec<Role>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = ANY($1) ORDER BY name"
        ))
        .bind(names)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = ANY($1) ORDER BY name"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn list(&self) -> Result<Vec<Role>, DataError> {
        let rows = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::database)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn update(&self, role: &Role) -> Result<(), DataError> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, description = $3, scope_expr = $4, actions = $5, \
             create_constraints = $6, immutable_keys = $7, version = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.scope_expr)
        .bind(&role.actions)
        .bind(constraints_json(role)?)
        .bind(&role.immutable_keys)
        .bind(role.version)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err(&format!("role '{}'", role.name), e))?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("role {}", role.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DataError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }
}

// ── role bindings ──

pub struct SqlxRoleBindingRepository {
    pool: PgPool,
}

impl SqlxRoleBindingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_role_from_row(row: &PgRow) -> Result<UserRole, DataError> {
    let principal = principal_from_columns(
        row.try_get("user_id").map_err(DataError::database)?,
        row.try_get("service_account_id").map_err(DataError::database)?,
        "user_roles",
    )?;
    Ok(UserRole {
        id: row.try_get("id").map_err(DataError::database)?,
        principal,
        role_id: row.try_get("role_id").map_err(DataError::database)?,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
    })
}

#[async_trait::async_trait]
impl RoleBindingRepository for SqlxRoleBindingRepository {
    async fn user_roles_for(&self, principal: PrincipalRef) -> Result<Vec<UserRole>, DataError> {
        let (user_id, service_account_id) = principal_to_columns(principal);
        let rows = sqlx::query(
            "SELECT id, user_id, service_account_id, role_id, created_at FROM user_roles \
             WHERE user_id IS NOT DISTINCT FROM $1 \
             AND service_account_id IS NOT DISTINCT FROM $2 \
             ORDER BY created_at",
        )
        .bind(user_id)
        .bind(service_account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(user_role_from_row).collect()
    }

    async fn insert_user_role(&self, binding: &UserRole) -> Result<(), DataError> {
        let (user_id, service_account_id) = principal_to_columns(binding.principal);
        sqlx::query(
            "INSERT INTO user_roles (id, user_id, service_account_id, role_id, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
        )
        .bind(binding.id)
        .bind(user_id)
        .bind(service_account_id)
        .bind(binding.role_id)
        .bind(binding.created_at)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    async fn delete_user_role(&self, id: Uuid) -> Result<bool, DataError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn assign_roles_to_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await.map_err(DataError::database)?;
        for role_id in role_ids {
            sqlx::query(
                "INSERT INTO user_roles (id, service_account_id, role_id, created_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(Uuid::now_v7())
            .bind(service_account_id)
            .bind(role_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        }
        tx.commit().await.map_err(DataError::database)?;
        Ok(())
    }

    async fn remove_roles_from_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), DataError> {
        sqlx::query(
            "DELETE FROM user_roles WHERE service_account_id = $1 AND role_id = ANY($2)",
        )
        .bind(service_account_id)
        .bind(role_ids)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    async fn list_group_roles(&self) -> Result<Vec<GroupRole>, DataError> {
        let rows = sqlx::query(
            "SELECT id, group_name, role_id, created_at FROM group_roles ORDER BY group_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter()
            .map(|row| {
                Ok(GroupRole {
                    id: row.try_get("id").map_err(DataError::database)?,
                    group: row.try_get("group_name").map_err(DataError::database)?,
                    role_id: row.try_get("role_id").map_err(DataError::database)?,
                    created_at: row.try_get("created_at").map_err(DataError::database)?,
                })
            })
            .collect()
    }

    async fn insert_group_role(&self, binding: &GroupRole) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO group_roles (id, group_name, role_id, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(binding.id)
        .bind(&binding.group)
        .bind(binding.role_id)
        .bind(binding.created_at)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    async fn delete_group_role(&self, id: Uuid) -> Result<bool, DataError> {
        let result = sqlx::query("DELETE FROM group_roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_bindings_for_role(&self, role_id: Uuid) -> Result<u64, DataError> {
        let mut tx = self.pool.begin().await.map_err(DataError::database)?;
        let users = sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        let groups = sqlx::query("DELETE FROM group_roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        tx.commit().await.map_err(DataError::database)?;
        Ok(users.rows_affected() + groups.rows_affected())
    }
}
