//! Service-account client-credentials authentication.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use grid_core::{AuthReason, GridError};
use grid_data::{Principal, PrincipalRef, ServiceAccountRepository, SessionRepository};

use crate::authenticator::{Authenticator, Outcome};
use crate::credentials::{Authentication, CredentialKind, Credentials};
use crate::password::PasswordHasher;
use crate::token::{issue_session, SessionParams};

/// Lifetime of sessions minted through the client-credentials grant.
pub const CLIENT_SESSION_TTL_SECS: u64 = 3600;

/// Verifies `client_id` + `client_secret` against the stored KDF hash and
/// issues a short-lived session on success.
pub struct ClientCredentialsAuthenticator {
    service_accounts: Arc<dyn ServiceAccountRepository>,
    sessions: Arc<dyn SessionRepository>,
    hasher: PasswordHasher,
}

impl ClientCredentialsAuthenticator {
    pub fn new(
        service_accounts: Arc<dyn ServiceAccountRepository>,
        sessions: Arc<dyn SessionRepository>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            service_accounts,
            sessions,
            hasher,
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for ClientCredentialsAuthenticator {
    fn name(&self) -> &'static str {
        "client-credentials"
    }

    async fn attempt(&self, credentials: &Credentials) -> Outcome {
        let Some(client) = &credentials.client else {
            return Outcome::Decline;
        };

        let account = match self
            .service_accounts
            .find_by_client_id(&client.client_id)
            .await
        {
            Ok(Some(account)) => account,
            // The same terminal failure for unknown ids and bad secrets,
            // so callers cannot probe which client ids exist.
            Ok(None) => {
                return Outcome::Failure(GridError::unauthenticated(
                    AuthReason::Malformed,
                    "invalid client credentials",
                ))
            }
            Err(err) => return Outcome::Failure(err.into()),
        };

        match self
            .hasher
            .verify(&client.client_secret, &account.client_secret_hash)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Outcome::Failure(GridError::unauthenticated(
                    AuthReason::Malformed,
                    "invalid client credentials",
                ))
            }
            Err(err) => return Outcome::Failure(err),
        }
        if account.disabled {
            return Outcome::Failure(GridError::permission_denied(
                "service account is disabled",
            ));
        }

        let issued = issue_session(
            self.sessions.as_ref(),
            PrincipalRef::ServiceAccount(account.id),
            CLIENT_SESSION_TTL_SECS,
            SessionParams {
                user_agent: credentials.user_agent.clone(),
                ip: credentials.ip.clone(),
                ..Default::default()
            },
        )
        .await;
        let (session, token) = match issued {
            Ok(pair) => pair,
            Err(err) => return Outcome::Failure(err),
        };

        if let Err(err) = self
            .service_accounts
            .update_last_used(account.id, Utc::now())
            .await
        {
            warn!(account = %account.id, error = %err, "failed to stamp last_used_at");
        }

        Outcome::Success(Authentication {
            principal: Principal::ServiceAccount(account),
            groups: Vec::new(),
            credential: CredentialKind::ClientCredentials,
            session_id: Some(session.id),
            jti: None,
            issued_token: Some(token),
        })
    }
}
