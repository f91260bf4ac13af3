//! Pluggable credential→principal mapping.
//!
//! Authenticators are evaluated in a fixed priority order (session → JWT →
//! client credentials). The first one that decides, with a success or a
//! terminal failure, wins; a terminal failure is never downgraded into
//! trying the next authenticator.

use std::sync::Arc;

use tracing::debug;

use grid_core::{AuthReason, GridError};

use crate::credentials::{Authentication, Credentials};

/// What one authenticator made of the credentials.
pub enum Outcome {
    /// This authenticator recognized and accepted the credentials.
    Success(Authentication),
    /// Not this authenticator's credential type; try the next one.
    Decline,
    /// Recognized the credential type and rejected it. Terminal.
    Failure(GridError),
}

#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, credentials: &Credentials) -> Outcome;
}

/// Fixed-priority authenticator list.
pub struct AuthenticatorChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthenticatorChain {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    /// Run the chain. Every authenticator declining means the request
    /// carried no usable credentials.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Authentication, GridError> {
        for authenticator in &self.authenticators {
            match authenticator.attempt(credentials).await {
                Outcome::Success(auth) => {
                    debug!(
                        authenticator = authenticator.name(),
                        principal = %auth.principal.qualified_id(),
                        "authenticated"
                    );
                    return Ok(auth);
                }
                Outcome::Decline => continue,
                Outcome::Failure(err) => {
                    debug!(
                        authenticator = authenticator.name(),
                        error = %err,
                        "authentication rejected"
                    );
                    return Err(err);
                }
            }
        }
        Err(GridError::unauthenticated(
            AuthReason::Missing,
            "no credentials presented",
        ))
    }
}
