//! Opaque session tokens.
//!
//! Tokens are 32 random bytes, base64url-encoded. Only the SHA-256 hex
//! digest of a token is ever persisted, so the sessions table cannot be
//! replayed if leaked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use grid_core::GridError;
use grid_data::{PrincipalRef, Session, SessionRepository};

/// Generate a fresh opaque bearer token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic one-way digest of a presented token, hex-encoded.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Everything the caller may attach to a freshly issued session.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub groups: Vec<String>,
    pub upstream_refresh_token: Option<String>,
    pub upstream_id_token: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Mint a session for a principal and persist it. Returns the stored row
/// together with the raw token; the token is returned exactly once and
/// never stored.
pub async fn issue_session(
    sessions: &dyn SessionRepository,
    principal: PrincipalRef,
    ttl_secs: u64,
    params: SessionParams,
) -> Result<(Session, String), GridError> {
    let token = generate_token();
    let now = Utc::now();
    let session = Session {
        id: Uuid::now_v7(),
        principal,
        token_hash: hash_token(&token),
        groups: params.groups,
        upstream_refresh_token: params.upstream_refresh_token,
        upstream_id_token: params.upstream_id_token,
        expires_at: now + Duration::seconds(ttl_secs as i64),
        user_agent: params.user_agent,
        ip: params.ip,
        revoked: false,
        created_at: now,
        last_used_at: None,
    };
    sessions.insert(&session).await?;
    Ok((session, token))
}
