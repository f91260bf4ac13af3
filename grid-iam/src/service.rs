//! The IAM facade: composes repositories, the authenticator chain, the
//! group→role cache, and token/password helpers.
//!
//! Role and binding mutations go straight to the repositories and never
//! touch in-process derived state; the cache is the only derived
//! authorization structure and it refreshes on its own triggers.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use grid_authz::action;
use grid_authz::EffectivePermissions;
use grid_core::config::Argon2Cost;
use grid_core::expr::Expr;
use grid_core::GridError;
use grid_data::{
    CreateConstraint, Repositories, RevokedJti, Role, ServiceAccount, Session, User, UserRole,
};
use grid_data::{DataError, PrincipalRef};
use grid_core::labels::LabelValue;

use crate::authenticator::{Authenticator, AuthenticatorChain};
use crate::client_credentials::{ClientCredentialsAuthenticator, CLIENT_SESSION_TTL_SECS};
use crate::credentials::{AuthenticatedPrincipal, Credentials};
use crate::group_cache::{GroupRoleCache, GroupRoleSnapshot};
use crate::jwt::{ClaimMapping, JwtAuthenticator, JwtVerifier};
use crate::password::PasswordHasher;
use crate::provision::jit_provision_user;
use crate::session_auth::SessionAuthenticator;
use crate::token::{generate_token, issue_session, SessionParams};

/// Construction knobs for [`IamService`].
pub struct IamOptions {
    pub session_ttl_secs: u64,
    pub argon2: Argon2Cost,
    /// JWT verification; absent in deployments without an IdP (tests,
    /// bootstrap).
    pub jwt: Option<(JwtVerifier, ClaimMapping)>,
}

impl Default for IamOptions {
    fn default() -> Self {
        Self {
            session_ttl_secs: 8 * 60 * 60,
            argon2: Argon2Cost::default(),
            jwt: None,
        }
    }
}

/// Everything needed to create or update an admin-defined role.
#[derive(Debug, Clone, Default)]
pub struct RoleSpec {
    pub name: String,
    pub description: String,
    pub scope_expr: String,
    pub actions: Vec<String>,
    pub create_constraints: std::collections::BTreeMap<String, CreateConstraint>,
    pub immutable_keys: Vec<String>,
}

/// Result of resolving role names.
#[derive(Debug, Clone)]
pub struct RoleLookup {
    pub found: Vec<Role>,
    pub invalid_names: Vec<String>,
    pub all_valid: bool,
}

pub struct IamService {
    repos: Repositories,
    chain: AuthenticatorChain,
    cache: Arc<GroupRoleCache>,
    hasher: PasswordHasher,
    session_ttl_secs: u64,
}

impl IamService {
    pub fn new(repos: Repositories, options: IamOptions) -> Self {
        let hasher = PasswordHasher::new(options.argon2);

        let mut authenticators: Vec<Arc<dyn Authenticator>> =
            vec![Arc::new(SessionAuthenticator::new(
                repos.sessions.clone(),
                repos.users.clone(),
                repos.service_accounts.clone(),
            ))];
        if let Some((verifier, mapping)) = options.jwt {
            authenticators.push(Arc::new(JwtAuthenticator::new(
                verifier,
                mapping,
                repos.users.clone(),
                repos.revoked_jtis.clone(),
            )));
        }
        authenticators.push(Arc::new(ClientCredentialsAuthenticator::new(
            repos.service_accounts.clone(),
            repos.sessions.clone(),
            hasher.clone(),
        )));

        Self {
            repos,
            chain: AuthenticatorChain::new(authenticators),
            cache: Arc::new(GroupRoleCache::new()),
            hasher,
            session_ttl_secs: options.session_ttl_secs,
        }
    }

    /// The cache handle, for wiring the background refresher.
    pub fn cache(&self) -> Arc<GroupRoleCache> {
        self.cache.clone()
    }

    // ── request authentication ──

    /// Run the authenticator chain and attach effective roles: direct
    /// bindings unioned with group-derived roles resolved through the
    /// current cache snapshot.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthenticatedPrincipal, GridError> {
        let auth = self.chain.authenticate(credentials).await?;
        let roles = self
            .roles_for(auth.principal.as_ref(), &auth.groups)
            .await?;
        Ok(AuthenticatedPrincipal {
            principal: auth.principal,
            roles,
            groups: auth.groups,
            credential: auth.credential,
            session_id: auth.session_id,
        })
    }

    /// Client-credentials token grant: authenticates the service account
    /// and returns the freshly minted bearer with its lifetime.
    pub async fn issue_client_token(
        &self,
        client_id: &str,
        client_secret: &str,
        user_agent: Option<String>,
        ip: Option<String>,
    ) -> Result<(String, u64), GridError> {
        let credentials = Credentials {
            user_agent,
            ip,
            ..Credentials::client(client_id, client_secret)
        };
        let auth = self.chain.authenticate(&credentials).await?;
        let token = auth
            .issued_token
            .ok_or_else(|| GridError::internal("client-credentials grant issued no token"))?;
        Ok((token, CLIENT_SESSION_TTL_SECS))
    }

    async fn roles_for(
        &self,
        principal: PrincipalRef,
        groups: &[String],
    ) -> Result<Vec<Role>, GridError> {
        let mut role_ids: HashSet<Uuid> = self
            .repos
            .role_bindings
            .user_roles_for(principal)
            .await?
            .into_iter()
            .map(|binding| binding.role_id)
            .collect();

        if !groups.is_empty() {
            let snapshot = self.cache.snapshot();
            role_ids.extend(snapshot.roles_for_groups(groups.iter().map(String::as_str)));
        }

        let ids: Vec<Uuid> = role_ids.into_iter().collect();
        let mut roles = self.repos.roles.find_by_ids(&ids).await?;
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    // ── users & sessions ──

    /// First-login provisioning for an external-IdP user; idempotent on
    /// the upstream subject.
    pub async fn jit_provision_user(
        &self,
        subject: &str,
        email: &str,
        display_name: &str,
    ) -> Result<User, GridError> {
        jit_provision_user(self.repos.users.as_ref(), subject, email, display_name).await
    }

    /// Issue a webapp/CLI session for a user who completed the IdP flow.
    /// Returns the raw token exactly once.
    pub async fn login_user(
        &self,
        user_id: Uuid,
        params: SessionParams,
    ) -> Result<(Session, String), GridError> {
        let user = self
            .repos
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("user {user_id}")))?;
        if user.disabled {
            return Err(GridError::permission_denied("user is disabled"));
        }
        issue_session(
            self.repos.sessions.as_ref(),
            PrincipalRef::User(user.id),
            self.session_ttl_secs,
            params,
        )
        .await
    }

    pub async fn revoke_session(&self, session_id: Uuid) -> Result<(), GridError> {
        if !self.repos.sessions.revoke(session_id).await? {
            return Err(GridError::not_found(format!("session {session_id}")));
        }
        Ok(())
    }

    /// Add a JWT id to the denylist. Idempotent on the jti.
    pub async fn revoke_jti(
        &self,
        jti: &str,
        subject: &str,
        expires_at: DateTime<Utc>,
        revoked_by: &str,
    ) -> Result<(), GridError> {
        self.repos
            .revoked_jtis
            .insert(&RevokedJti {
                jti: jti.to_string(),
                subject: subject.to_string(),
                expires_at,
                revoked_at: Utc::now(),
                revoked_by: revoked_by.to_string(),
            })
            .await?;
        info!(jti, subject, revoked_by, "JWT revoked");
        Ok(())
    }

    // ── service accounts ──

    /// Create a service account. The generated client secret is returned
    /// exactly once; only its argon2 hash is stored.
    pub async fn create_service_account(
        &self,
        name: &str,
        description: &str,
    ) -> Result<(ServiceAccount, String), GridError> {
        if name.trim().is_empty() {
            return Err(GridError::invalid_argument("service account name is empty"));
        }
        let client_secret = generate_token();
        let account = ServiceAccount {
            id: Uuid::now_v7(),
            name: name.to_string(),
            client_id: format!("grid-sa-{}", Uuid::new_v4().simple()),
            client_secret_hash: self.hasher.hash(&client_secret).await?,
            description: description.to_string(),
            disabled: false,
            created_at: Utc::now(),
            last_used_at: None,
        };
        match self.repos.service_accounts.insert(&account).await {
            Ok(()) => Ok((account, client_secret)),
            Err(DataError::Conflict(_)) => {
                Err(GridError::already_exists(format!("service account '{name}'")))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_service_account_by_name(
        &self,
        name: &str,
    ) -> Result<ServiceAccount, GridError> {
        self.repos
            .service_accounts
            .find_by_name(name)
            .await?
            .ok_or_else(|| GridError::not_found(format!("service account '{name}'")))
    }

    // ── roles & bindings ──

    /// Resolve role names to records, reporting the names that matched
    /// nothing.
    pub async fn get_roles_by_name(&self, names: &[String]) -> Result<RoleLookup, GridError> {
        let found = self.repos.roles.find_by_names(names).await?;
        let known: HashSet<&str> = found.iter().map(|r| r.name.as_str()).collect();
        let invalid_names: Vec<String> = names
            .iter()
            .filter(|n| !known.contains(n.as_str()))
            .cloned()
            .collect();
        let all_valid = invalid_names.is_empty();
        Ok(RoleLookup {
            found,
            invalid_names,
            all_valid,
        })
    }

    /// Bind roles to a service account. Transactional at the repository
    /// seam; already-bound pairs are left alone.
    pub async fn assign_roles_to_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), GridError> {
        self.repos
            .service_accounts
            .get(service_account_id)
            .await?
            .ok_or_else(|| {
                GridError::not_found(format!("service account {service_account_id}"))
            })?;
        let roles = self.repos.roles.find_by_ids(role_ids).await?;
        if roles.len() != role_ids.len() {
            let known: HashSet<Uuid> = roles.iter().map(|r| r.id).collect();
            let missing: Vec<String> = role_ids
                .iter()
                .filter(|id| !known.contains(id))
                .map(Uuid::to_string)
                .collect();
            return Err(GridError::invalid_argument(format!(
                "unknown role ids: {}",
                missing.join(", ")
            )));
        }
        self.repos
            .role_bindings
            .assign_roles_to_service_account(service_account_id, role_ids)
            .await?;
        Ok(())
    }

    pub async fn remove_roles_from_service_account(
        &self,
        service_account_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), GridError> {
        self.repos
            .role_bindings
            .remove_roles_from_service_account(service_account_id, role_ids)
            .await?;
        Ok(())
    }

    /// Bind a role directly to a user.
    pub async fn assign_role_to_user(&self, user_id: Uuid, role_id: Uuid) -> Result<(), GridError> {
        self.repos
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("user {user_id}")))?;
        self.repos
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("role {role_id}")))?;
        self.repos
            .role_bindings
            .insert_user_role(&UserRole {
                id: Uuid::now_v7(),
                principal: PrincipalRef::User(user_id),
                role_id,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    pub async fn create_role(&self, spec: RoleSpec) -> Result<Role, GridError> {
        validate_role_spec(&spec)?;
        let now = Utc::now();
        let role = Role {
            id: Uuid::now_v7(),
            name: spec.name,
            description: spec.description,
            scope_expr: spec.scope_expr,
            actions: spec.actions,
            create_constraints: spec.create_constraints,
            immutable_keys: spec.immutable_keys,
            version: 1,
            system: false,
            created_at: now,
            updated_at: now,
        };
        match self.repos.roles.insert(&role).await {
            Ok(()) => Ok(role),
            Err(DataError::Conflict(_)) => {
                Err(GridError::already_exists(format!("role '{}'", role.name)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Update an admin-defined role in place. The name is immutable; the
    /// version increments on every update.
    pub async fn update_role(&self, role_id: Uuid, spec: RoleSpec) -> Result<Role, GridError> {
        validate_role_spec(&spec)?;
        let mut role = self
            .repos
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("role {role_id}")))?;
        role.description = spec.description;
        role.scope_expr = spec.scope_expr;
        role.actions = spec.actions;
        role.create_constraints = spec.create_constraints;
        role.immutable_keys = spec.immutable_keys;
        role.version += 1;
        role.updated_at = Utc::now();
        self.repos.roles.update(&role).await?;
        Ok(role)
    }

    /// Delete an admin-defined role and every binding referencing it.
    /// System roles cannot be deleted.
    pub async fn delete_role(&self, role_id: Uuid) -> Result<(), GridError> {
        let role = self
            .repos
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("role {role_id}")))?;
        if role.system {
            return Err(GridError::failed_precondition(format!(
                "role '{}' is system-defined",
                role.name
            )));
        }
        self.repos
            .role_bindings
            .delete_bindings_for_role(role_id)
            .await?;
        self.repos.roles.delete(role_id).await?;
        Ok(())
    }

    // ── housekeeping ──

    /// Drop expired sessions and spent denylist rows. Runs on the
    /// refresher's tick; both deletes are idempotent.
    pub async fn purge_expired(&self) -> Result<(u64, u64), GridError> {
        let now = Utc::now();
        let sessions = self.repos.sessions.delete_expired(now).await?;
        let jtis = self.repos.revoked_jtis.purge_expired(now).await?;
        Ok((sessions, jtis))
    }

    // ── cache ──

    pub async fn refresh_group_role_cache(&self) -> Result<u64, GridError> {
        self.cache.refresh(self.repos.role_bindings.as_ref()).await
    }

    pub fn group_role_cache_snapshot(&self) -> Arc<GroupRoleSnapshot> {
        self.cache.snapshot()
    }

    // ── effective permissions ──

    /// What a principal can currently do, as rendered by CLIs and the
    /// webapp.
    pub async fn effective_permissions(
        &self,
        principal: PrincipalRef,
        groups: &[String],
    ) -> Result<EffectivePermissions, GridError> {
        let roles = self.roles_for(principal, groups).await?;
        Ok(EffectivePermissions::from_roles(&roles))
    }

    // ── seeding ──

    /// Idempotently seed the system roles. Existing rows are left alone.
    pub async fn seed_system_roles(&self) -> Result<(), GridError> {
        for role in system_roles() {
            match self.repos.roles.insert(&role).await {
                Ok(()) => info!(role = %role.name, "seeded system role"),
                Err(DataError::Conflict(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn validate_role_spec(spec: &RoleSpec) -> Result<(), GridError> {
    if spec.name.trim().is_empty() {
        return Err(GridError::invalid_argument("role name is empty"));
    }
    if spec.actions.is_empty() {
        return Err(GridError::invalid_argument("role grants no actions"));
    }
    Expr::parse(&spec.scope_expr)
        .map_err(|e| GridError::invalid_argument(format!("scope expression: {e}")))?;
    Ok(())
}

fn system_roles() -> Vec<Role> {
    let now = Utc::now();
    let base = Role {
        id: Uuid::now_v7(),
        name: String::new(),
        description: String::new(),
        scope_expr: String::new(),
        actions: Vec::new(),
        create_constraints: Default::default(),
        immutable_keys: Vec::new(),
        version: 1,
        system: true,
        created_at: now,
        updated_at: now,
    };

    let platform_engineer = Role {
        id: Uuid::now_v7(),
        name: "platform-engineer".into(),
        description: "Full access to every state and IAM operation".into(),
        actions: vec!["*".into()],
        ..base.clone()
    };

    let mut product_constraints = std::collections::BTreeMap::new();
    product_constraints.insert(
        "env".to_string(),
        CreateConstraint {
            allowed_values: vec![LabelValue::from("dev"), LabelValue::from("staging")],
            required: true,
        },
    );
    let product_engineer = Role {
        id: Uuid::now_v7(),
        name: "product-engineer".into(),
        description: "State and dependency management outside production".into(),
        scope_expr: r#"env != "prod""#.into(),
        actions: vec![
            action::STATE_CREATE.into(),
            action::STATE_READ.into(),
            action::STATE_WRITE.into(),
            action::STATE_LIST.into(),
            action::STATE_LOCK.into(),
            action::STATE_UNLOCK.into(),
            action::DEPENDENCY_READ.into(),
            action::DEPENDENCY_WRITE.into(),
            action::STATE_OUTPUT_READ.into(),
        ],
        create_constraints: product_constraints,
        immutable_keys: vec!["env".into()],
        ..base.clone()
    };

    let service_account = Role {
        id: Uuid::now_v7(),
        name: "service-account".into(),
        description: "Pipeline access: read, write and lock states".into(),
        actions: vec![
            action::STATE_READ.into(),
            action::STATE_WRITE.into(),
            action::STATE_LIST.into(),
            action::STATE_LOCK.into(),
            action::STATE_UNLOCK.into(),
            action::DEPENDENCY_READ.into(),
            action::STATE_OUTPUT_READ.into(),
        ],
        ..base
    };

    vec![platform_engineer, product_engineer, service_account]
}
