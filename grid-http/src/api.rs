//! The control-plane JSON surface: states, dependencies, IAM.
//!
//! Handlers stay thin: extract, authorize through the engine, delegate to
//! a service, map errors by kind. Failure bodies carry
//! `{"error": {"kind", "message", ...}}` with the canonical kind strings.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Form, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grid_authz::{action, authorize, EffectivePermissions, ResourceContext};
use grid_core::config::MANUAL_REFRESH_TIMEOUT_SECS;
use grid_core::labels::Labels;
use grid_core::GridError;
use grid_data::{CreateConstraint, StateRecord};
use grid_iam::service::RoleSpec;
use grid_iam::AuthenticatedPrincipal;

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/states", post(create_state).get(list_states))
        .route("/api/v1/states/{state_ref}", get(get_state).delete(delete_state))
        .route("/api/v1/states/{state_ref}/config", get(get_state_config))
        .route("/api/v1/states/{state_ref}/labels", put(update_state_labels))
        .route("/api/v1/states/{state_ref}/status", get(state_status))
        .route("/api/v1/states/{state_ref}/order", get(topological_order))
        .route("/api/v1/states/{state_ref}/dependencies", get(list_dependencies))
        .route("/api/v1/states/{state_ref}/dependents", get(list_dependents))
        .route("/api/v1/dependencies", post(add_dependency))
        .route("/api/v1/dependencies/search", get(search_dependencies))
        .route("/api/v1/dependencies/{id}", delete(remove_dependency))
        .route("/api/v1/dependencies/{id}/consume", post(consume_dependency))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/iam/me", get(me))
        .route("/api/v1/iam/service-accounts", post(create_service_account))
        .route("/api/v1/iam/service-accounts/{name}", get(get_service_account))
        .route(
            "/api/v1/iam/service-accounts/{name}/roles",
            post(assign_service_account_roles).delete(remove_service_account_roles),
        )
        .route("/api/v1/iam/roles", post(create_role))
        .route("/api/v1/iam/roles/{id}", put(update_role).delete(delete_role))
        .route("/api/v1/iam/revocations", post(revoke_jti))
        .route("/api/v1/iam/cache/refresh", post(refresh_cache))
}

fn check(
    principal: &AuthenticatedPrincipal,
    act: &str,
    resource: &ResourceContext<'_>,
) -> Result<(), ApiError> {
    if !authorize(principal.id(), &principal.roles, act, resource).is_allowed() {
        return Err(ApiError(GridError::permission_denied(format!(
            "{act} is not granted"
        ))));
    }
    Ok(())
}

fn check_on_state(
    principal: &AuthenticatedPrincipal,
    record: &StateRecord,
    act: &str,
) -> Result<(), ApiError> {
    let resource = ResourceContext::state(
        &record.labels,
        record.lock.as_ref().and_then(|l| l.owner_principal_id),
    );
    check(principal, act, &resource)
}

// ── auth ──

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// `POST /api/v1/auth/token`: the client-credentials grant. Public.
pub async fn token(
    State(state): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> Result<Response, ApiError> {
    if request.grant_type != "client_credentials" {
        return Err(ApiError(GridError::invalid_argument(format!(
            "unsupported grant_type '{}'",
            request.grant_type
        ))));
    }
    let client_id = request
        .client_id
        .ok_or_else(|| ApiError(GridError::invalid_argument("missing 'client_id'")))?;
    let client_secret = request
        .client_secret
        .ok_or_else(|| ApiError(GridError::invalid_argument("missing 'client_secret'")))?;

    let (access_token, expires_in) = state
        .iam
        .issue_client_token(&client_id, &client_secret, None, None)
        .await?;
    // Token responses must never be cached.
    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in,
        }),
    )
        .into_response())
}

/// `POST /api/v1/auth/logout`: revoke the presented session.
pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Result<StatusCode, ApiError> {
    match principal.session_id {
        Some(session_id) => {
            state.iam.revoke_session(session_id).await?;
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError(GridError::failed_precondition(
            "the presented credential is not a session",
        ))),
    }
}

// ── states ──

#[derive(Debug, Deserialize)]
pub struct CreateStateRequest {
    pub guid: String,
    pub logic_id: String,
    #[serde(default)]
    pub labels: Labels,
}

pub async fn create_state(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<CreateStateRequest>,
) -> Result<Response, ApiError> {
    check(
        &principal,
        action::STATE_CREATE,
        &ResourceContext {
            labels: Some(&request.labels),
            lock_owner: None,
        },
    )?;
    let config = state
        .states
        .create_state(&request.guid, &request.logic_id, request.labels, &principal.roles)
        .await?;
    Ok((StatusCode::CREATED, Json(config)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListStatesQuery {
    pub filter: Option<String>,
    #[serde(default)]
    pub include_labels: bool,
}

/// Listing is visibility-filtered: a row appears only when the caller
/// could read that state.
pub async fn list_states(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Query(query): Query<ListStatesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summaries = state
        .states
        .list_states(query.filter.as_deref(), true)
        .await?;
    let visible: Vec<_> = summaries
        .into_iter()
        .filter(|s| {
            let labels = s.labels.clone().unwrap_or_default();
            authorize(
                principal.id(),
                &principal.roles,
                action::STATE_READ,
                &ResourceContext {
                    labels: Some(&labels),
                    lock_owner: None,
                },
            )
            .is_allowed()
        })
        .map(|mut s| {
            if !query.include_labels {
                s.labels = None;
            }
            s
        })
        .collect();
    Ok(Json(serde_json::json!({ "states": visible })))
}

#[derive(Serialize)]
pub struct StateView {
    pub guid: Uuid,
    pub logic_id: String,
    pub labels: Labels,
    pub locked: bool,
    pub lock: Option<serde_json::Value>,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateView {
    fn from_record(record: StateRecord) -> Self {
        Self {
            guid: record.guid,
            logic_id: record.logic_id.clone(),
            locked: record.locked(),
            lock: record.lock.as_ref().map(|l| l.wire_json()),
            size: record.content_len(),
            labels: record.labels,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

pub async fn get_state(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
) -> Result<Json<StateView>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::STATE_READ)?;
    Ok(Json(StateView::from_record(record)))
}

pub async fn get_state_config(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::STATE_READ)?;
    let (guid, config) = state.states.get_state_config(&record.logic_id).await?;
    Ok(Json(serde_json::json!({ "guid": guid, "backend": config })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateLabelsRequest {
    pub labels: Labels,
}

pub async fn update_state_labels(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
    Json(request): Json<UpdateLabelsRequest>,
) -> Result<Json<StateView>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::STATE_WRITE)?;
    let updated = state
        .states
        .update_state_labels(record.guid, request.labels, &principal.roles)
        .await?;
    Ok(Json(StateView::from_record(updated)))
}

pub async fn delete_state(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
) -> Result<StatusCode, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::STATE_DELETE)?;
    state.states.delete_state(record.guid).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── dependency queries on a state ──

pub async fn state_status(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
) -> Result<Json<grid_state::StateStatusReport>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::DEPENDENCY_READ)?;
    let report = state.deps.state_status(&record.guid.to_string()).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub direction: Option<String>,
}

pub async fn topological_order(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::DEPENDENCY_READ)?;
    let layers = state
        .deps
        .topological_order(&record.guid.to_string(), query.direction.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "layers": layers })))
}

pub async fn list_dependencies(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::DEPENDENCY_READ)?;
    let edges = state.deps.list_dependencies(&record.guid.to_string()).await?;
    Ok(Json(serde_json::json!({ "dependencies": edges })))
}

pub async fn list_dependents(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(state_ref): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.states.resolve_ref(&state_ref).await?;
    check_on_state(&principal, &record, action::DEPENDENCY_READ)?;
    let edges = state.deps.list_dependents(&record.guid.to_string()).await?;
    Ok(Json(serde_json::json!({ "dependents": edges })))
}

// ── dependencies ──

#[derive(Debug, Deserialize)]
pub struct AddDependencyRequest {
    pub from: String,
    pub from_output: String,
    pub to: String,
    pub to_input_name: Option<String>,
    pub mock_value: Option<serde_json::Value>,
}

pub async fn add_dependency(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<AddDependencyRequest>,
) -> Result<Response, ApiError> {
    // The consumer is the resource being modified.
    let consumer = state.states.resolve_ref(&request.to).await?;
    check_on_state(&principal, &consumer, action::DEPENDENCY_WRITE)?;
    let result = state
        .deps
        .add_dependency(
            &request.from,
            &request.from_output,
            &request.to,
            request.to_input_name.as_deref(),
            request.mock_value,
        )
        .await?;
    let status = if result.already_exists {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(serde_json::json!({
            "edge": result.edge,
            "already_exists": result.already_exists,
        })),
    )
        .into_response())
}

pub async fn remove_dependency(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let consumer = edge_consumer(&state, id).await?;
    check_on_state(&principal, &consumer, action::DEPENDENCY_WRITE)?;
    state.deps.remove_dependency(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn consume_dependency(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let consumer = edge_consumer(&state, id).await?;
    check_on_state(&principal, &consumer, action::DEPENDENCY_WRITE)?;
    let edge = state.deps.mark_consumed(id).await?;
    Ok(Json(serde_json::json!({ "edge": edge })))
}

/// Load the consumer state of an edge for authorization.
async fn edge_consumer(state: &AppState, edge_id: Uuid) -> Result<StateRecord, ApiError> {
    let edge = state.deps.get_edge(edge_id).await?;
    Ok(state
        .states
        .get_state_by_guid(edge.to_state)
        .await?)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub output: String,
}

pub async fn search_dependencies(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check(&principal, action::DEPENDENCY_READ, &ResourceContext::default())?;
    let edges = state.deps.search_by_output(&query.output).await?;
    Ok(Json(serde_json::json!({ "edges": edges })))
}

// ── IAM ──

/// `GET /api/v1/iam/me`: who am I and what can I do.
pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let permissions: EffectivePermissions = state
        .iam
        .effective_permissions(principal.principal.as_ref(), &principal.groups)
        .await?;
    Ok(Json(serde_json::json!({
        "principal": principal.qualified_id().to_string(),
        "display_name": principal.principal.display_name(),
        "credential": principal.credential,
        "groups": principal.groups,
        "permissions": permissions,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceAccountRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create_service_account(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<CreateServiceAccountRequest>,
) -> Result<Response, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let (account, client_secret) = state
        .iam
        .create_service_account(&request.name, &request.description)
        .await?;
    // The secret appears in this response and nowhere else, ever.
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "service_account": account,
            "client_secret": client_secret,
        })),
    )
        .into_response())
}

pub async fn get_service_account(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let account = state.iam.get_service_account_by_name(&name).await?;
    Ok(Json(serde_json::json!({ "service_account": account })))
}

#[derive(Debug, Deserialize)]
pub struct RoleNamesRequest {
    pub roles: Vec<String>,
}

pub async fn assign_service_account_roles(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
    Json(request): Json<RoleNamesRequest>,
) -> Result<StatusCode, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let account = state.iam.get_service_account_by_name(&name).await?;
    let lookup = state.iam.get_roles_by_name(&request.roles).await?;
    if !lookup.all_valid {
        return Err(ApiError(GridError::invalid_argument(format!(
            "unknown roles: {}",
            lookup.invalid_names.join(", ")
        ))));
    }
    let role_ids: Vec<Uuid> = lookup.found.iter().map(|r| r.id).collect();
    state
        .iam
        .assign_roles_to_service_account(account.id, &role_ids)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_service_account_roles(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
    Json(request): Json<RoleNamesRequest>,
) -> Result<StatusCode, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let account = state.iam.get_service_account_by_name(&name).await?;
    let lookup = state.iam.get_roles_by_name(&request.roles).await?;
    let role_ids: Vec<Uuid> = lookup.found.iter().map(|r| r.id).collect();
    state
        .iam
        .remove_roles_from_service_account(account.id, &role_ids)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scope_expr: String,
    pub actions: Vec<String>,
    #[serde(default)]
    pub create_constraints: BTreeMap<String, CreateConstraint>,
    #[serde(default)]
    pub immutable_keys: Vec<String>,
}

impl RoleRequest {
    fn into_spec(self) -> RoleSpec {
        RoleSpec {
            name: self.name,
            description: self.description,
            scope_expr: self.scope_expr,
            actions: self.actions,
            create_constraints: self.create_constraints,
            immutable_keys: self.immutable_keys,
        }
    }
}

pub async fn create_role(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<RoleRequest>,
) -> Result<Response, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let role = state.iam.create_role(request.into_spec()).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "role": role }))).into_response())
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(id): Path<Uuid>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let role = state.iam.update_role(id, request.into_spec()).await?;
    Ok(Json(serde_json::json!({ "role": role })))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    state.iam.delete_role(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RevokeJtiRequest {
    pub jti: String,
    pub subject: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn revoke_jti(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Json(request): Json<RevokeJtiRequest>,
) -> Result<StatusCode, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    state
        .iam
        .revoke_jti(
            &request.jti,
            &request.subject,
            request.expires_at,
            &principal.qualified_id().to_string(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/iam/cache/refresh`: the ops-immediacy escape hatch,
/// bounded so a wedged store cannot hang the caller.
pub async fn refresh_cache(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check(&principal, action::IAM_ADMIN, &ResourceContext::default())?;
    let version = tokio::time::timeout(
        std::time::Duration::from_secs(MANUAL_REFRESH_TIMEOUT_SECS),
        state.iam.refresh_group_role_cache(),
    )
    .await
    .map_err(|_| ApiError(GridError::internal("cache refresh timed out")))??;
    Ok(Json(serde_json::json!({ "version": version })))
}
