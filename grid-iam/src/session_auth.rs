//! Session-token authentication.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use grid_core::{AuthReason, GridError};
use grid_data::{
    Principal, PrincipalRef, ServiceAccountRepository, SessionRepository, UserRepository,
};

use crate::authenticator::{Authenticator, Outcome};
use crate::credentials::{Authentication, CredentialKind, Credentials};
use crate::token::hash_token;

/// Resolves opaque bearer tokens against the sessions table.
///
/// The presented token is hashed with the same one-way digest used at
/// issuance; the raw token never reaches storage or logs. An unknown hash
/// declines (the bearer may be a JWT); a revoked or expired session is a
/// terminal failure.
pub struct SessionAuthenticator {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    service_accounts: Arc<dyn ServiceAccountRepository>,
}

impl SessionAuthenticator {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        service_accounts: Arc<dyn ServiceAccountRepository>,
    ) -> Self {
        Self {
            sessions,
            users,
            service_accounts,
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for SessionAuthenticator {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn attempt(&self, credentials: &Credentials) -> Outcome {
        let Some(bearer) = credentials.bearer.as_deref() else {
            return Outcome::Decline;
        };

        let session = match self.sessions.find_by_token_hash(&hash_token(bearer)).await {
            Ok(Some(session)) => session,
            Ok(None) => return Outcome::Decline,
            Err(err) => return Outcome::Failure(err.into()),
        };

        if session.revoked {
            return Outcome::Failure(GridError::unauthenticated(
                AuthReason::Revoked,
                "session has been revoked",
            ));
        }
        let now = Utc::now();
        if session.expired(now) {
            return Outcome::Failure(GridError::unauthenticated(
                AuthReason::Expired,
                "session has expired",
            ));
        }

        let principal = match session.principal {
            PrincipalRef::User(id) => match self.users.get(id).await {
                Ok(Some(user)) => Principal::User(user),
                Ok(None) => {
                    return Outcome::Failure(GridError::internal(format!(
                        "session {} references a missing user",
                        session.id
                    )))
                }
                Err(err) => return Outcome::Failure(err.into()),
            },
            PrincipalRef::ServiceAccount(id) => match self.service_accounts.get(id).await {
                Ok(Some(account)) => Principal::ServiceAccount(account),
                Ok(None) => {
                    return Outcome::Failure(GridError::internal(format!(
                        "session {} references a missing service account",
                        session.id
                    )))
                }
                Err(err) => return Outcome::Failure(err.into()),
            },
        };
        if principal.disabled() {
            return Outcome::Failure(GridError::permission_denied("principal is disabled"));
        }

        // Usage stamps are best-effort; a failed write never fails auth.
        if let Err(err) = self.sessions.touch(session.id, now).await {
            warn!(session = %session.id, error = %err, "failed to touch session");
        }
        let touch_result = match session.principal {
            PrincipalRef::User(id) => self.users.update_last_used(id, now).await,
            PrincipalRef::ServiceAccount(id) => {
                self.service_accounts.update_last_used(id, now).await
            }
        };
        if let Err(err) = touch_result {
            warn!(principal = %principal.qualified_id(), error = %err, "failed to stamp last_used_at");
        }

        Outcome::Success(Authentication {
            principal,
            groups: session.groups.clone(),
            credential: CredentialKind::Session,
            session_id: Some(session.id),
            jti: None,
            issued_token: None,
        })
    }
}
