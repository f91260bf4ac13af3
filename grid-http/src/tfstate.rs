//! The Terraform HTTP backend protocol, bit-compatible with the
//! `http` backend's expectations:
//!
//! - `GET /tfstate/{guid}` → the blob or 404
//! - `POST /tfstate/{guid}?ID=<lock id>` → 200 / 423
//! - `LOCK /tfstate/{guid}/lock` → 200 / 423 with the holder's LockInfo
//! - `UNLOCK /tfstate/{guid}/unlock` → 200 / 400 / 404
//!
//! LOCK/UNLOCK are Terraform's default custom verbs; POST is accepted as
//! a fallback for proxies that refuse them.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use grid_authz::{action, authorize, ResourceContext};
use grid_core::GridError;
use grid_data::{LockInfo, StateRecord};
use grid_iam::AuthenticatedPrincipal;

use crate::error::ApiError;
use crate::AppState;

/// Header flagged on writes that exceed the size-warning threshold.
pub const SIZE_WARNING_HEADER: &str = "X-Grid-State-Size-Warning";

#[derive(Debug, Deserialize)]
pub struct LockIdQuery {
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

async fn load_state(state: &AppState, guid: Uuid) -> Result<StateRecord, ApiError> {
    state.states.get_state_by_guid(guid).await.map_err(ApiError)
}

fn authorize_on_state(
    principal: &AuthenticatedPrincipal,
    record: &StateRecord,
    act: &str,
) -> Result<(), ApiError> {
    let resource = ResourceContext::state(
        &record.labels,
        record.lock.as_ref().and_then(|l| l.owner_principal_id),
    );
    if !authorize(principal.id(), &principal.roles, act, &resource).is_allowed() {
        return Err(ApiError(GridError::permission_denied(format!(
            "{act} on state '{}'",
            record.logic_id
        ))));
    }
    Ok(())
}

/// `GET /tfstate/{guid}`
pub async fn get_state(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Response {
    let record = match load_state(&state, guid).await {
        Ok(record) => record,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize_on_state(&principal, &record, action::STATE_READ) {
        return err.into_response();
    }
    match record.content {
        Some(blob) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            blob,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `POST /tfstate/{guid}?ID=<lock id>`
pub async fn post_state(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
    Query(query): Query<LockIdQuery>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    body: Bytes,
) -> Response {
    let record = match load_state(&state, guid).await {
        Ok(record) => record,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize_on_state(&principal, &record, action::STATE_WRITE) {
        return err.into_response();
    }

    match state
        .states
        .update_state_content(guid, &body, query.id.as_deref())
        .await
    {
        Ok(outcome) => {
            let mut headers = HeaderMap::new();
            if outcome.size_warning {
                headers.insert(SIZE_WARNING_HEADER, HeaderValue::from_static("true"));
            }
            (StatusCode::OK, headers).into_response()
        }
        Err(err) => locked_or_api_error(err),
    }
}

/// `LOCK /tfstate/{guid}/lock` (POST accepted).
pub async fn lock_state(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
    method: Method,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    body: Bytes,
) -> Response {
    if !is_verb(&method, "LOCK") {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let mut lock = match parse_lock_body(&body) {
        Ok(lock) => lock,
        Err(err) => return err.into_response(),
    };
    let record = match load_state(&state, guid).await {
        Ok(record) => record,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize_on_state(&principal, &record, action::STATE_LOCK) {
        return err.into_response();
    }

    lock.owner_principal_id = Some(principal.id());
    match state.states.lock_state(guid, lock).await {
        Ok(stored) => (StatusCode::OK, Json(stored.wire_json())).into_response(),
        Err(err) => locked_or_api_error(err),
    }
}

/// `UNLOCK /tfstate/{guid}/unlock` (POST/DELETE accepted).
pub async fn unlock_state(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
    method: Method,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    body: Bytes,
) -> Response {
    if !is_verb(&method, "UNLOCK") && method != Method::DELETE {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let lock = match parse_lock_body(&body) {
        Ok(lock) => lock,
        Err(err) => return err.into_response(),
    };
    let record = match load_state(&state, guid).await {
        Ok(record) => record,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize_on_state(&principal, &record, action::STATE_UNLOCK) {
        return err.into_response();
    }

    match state.states.unlock_state(guid, &lock.id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// Terraform sends `LockInfo` JSON on both lock and unlock.
fn parse_lock_body(bytes: &Bytes) -> Result<LockInfo, ApiError> {
    if bytes.is_empty() {
        return Ok(LockInfo::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError(GridError::invalid_argument(format!("invalid LockInfo: {e}"))))
}

fn is_verb(method: &Method, verb: &str) -> bool {
    method.as_str().eq_ignore_ascii_case(verb) || *method == Method::POST
}

/// Lock conflicts answer 423 with the holder's LockInfo as the whole
/// body; that is what `terraform` prints to the user.
fn locked_or_api_error(err: GridError) -> Response {
    if let GridError::Locked {
        lock: Some(holder), ..
    } = &err
    {
        debug!("lock conflict");
        return (StatusCode::LOCKED, Json(holder.clone())).into_response();
    }
    ApiError(err).into_response()
}
