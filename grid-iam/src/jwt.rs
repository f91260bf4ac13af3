//! JWT verification and the JWT authenticator.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};

use grid_core::config::OidcConfig;
use grid_core::{AuthReason, GridError};
use grid_data::{Principal, RevokedJtiRepository, UserRepository};

use crate::authenticator::{Authenticator, Outcome};
use crate::credentials::{Authentication, CredentialKind, Credentials};
use crate::jwks::JwksKeyStore;
use crate::provision::jit_provision_user;

enum KeySource {
    Jwks(Arc<JwksKeyStore>),
    /// Fixed key for tests; pairs with an explicit algorithm.
    Static(DecodingKey),
}

/// Validates signatures and the standard claims (`iss`, `aud`, `exp`,
/// `nbf`) and returns the raw claim set.
pub struct JwtVerifier {
    keys: KeySource,
    issuer: String,
    audience: String,
    algorithms: Vec<Algorithm>,
}

impl JwtVerifier {
    /// JWKS-backed verifier; RS256 only, the ecosystem default.
    pub fn new(jwks: Arc<JwksKeyStore>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            keys: KeySource::Jwks(jwks),
            issuer: issuer.into(),
            audience: audience.into(),
            algorithms: vec![Algorithm::RS256],
        }
    }

    /// Fixed-key verifier for tests.
    pub fn with_static_key(
        key: DecodingKey,
        algorithm: Algorithm,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            keys: KeySource::Static(key),
            issuer: issuer.into(),
            audience: audience.into(),
            algorithms: vec![algorithm],
        }
    }

    /// Verify a token and return its claims.
    pub async fn verify(&self, token: &str) -> Result<serde_json::Value, GridError> {
        let header = decode_header(token).map_err(|e| {
            GridError::unauthenticated(AuthReason::Malformed, format!("undecodable JWT header: {e}"))
        })?;

        if !self.algorithms.contains(&header.alg) {
            return Err(GridError::unauthenticated(
                AuthReason::Malformed,
                format!("disallowed JWT algorithm {:?}", header.alg),
            ));
        }

        let key = match &self.keys {
            KeySource::Static(key) => key.clone(),
            KeySource::Jwks(jwks) => {
                let kid = header.kid.as_deref().ok_or_else(|| {
                    GridError::unauthenticated(
                        AuthReason::Malformed,
                        "JWT header is missing 'kid'",
                    )
                })?;
                jwks.key_for(kid).await?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.algorithms = self.algorithms.clone();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let data = decode::<serde_json::Value>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            let err = match e.kind() {
                ErrorKind::ExpiredSignature => {
                    GridError::unauthenticated(AuthReason::Expired, "token expired")
                }
                ErrorKind::ImmatureSignature => {
                    GridError::unauthenticated(AuthReason::Malformed, "token not yet valid")
                }
                ErrorKind::InvalidIssuer => {
                    GridError::unauthenticated(AuthReason::Malformed, "issuer mismatch")
                }
                ErrorKind::InvalidAudience => {
                    GridError::unauthenticated(AuthReason::Malformed, "audience mismatch")
                }
                _ => GridError::unauthenticated(
                    AuthReason::Malformed,
                    format!("token rejected: {e}"),
                ),
            };
            warn!(error = %err, "JWT validation failed");
            err
        })?;

        debug!(
            sub = data.claims.get("sub").and_then(|v| v.as_str()).unwrap_or("?"),
            "JWT verified"
        );
        Ok(data.claims)
    }
}

/// Which claims carry the user id, email and groups.
#[derive(Debug, Clone)]
pub struct ClaimMapping {
    pub user_id_field: String,
    pub email_field: String,
    pub groups_field: String,
    /// Optional dotted path overriding `groups_field`
    /// (e.g. `realm_access.roles`).
    pub groups_path: Option<String>,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            user_id_field: "sub".into(),
            email_field: "email".into(),
            groups_field: "groups".into(),
            groups_path: None,
        }
    }
}

impl ClaimMapping {
    pub fn from_oidc(config: &OidcConfig) -> Self {
        Self {
            user_id_field: config.user_id_claim_field.clone(),
            email_field: config.email_claim_field.clone(),
            groups_field: config.groups_claim_field.clone(),
            groups_path: config.groups_claim_path.clone(),
        }
    }

    fn groups_from(&self, claims: &serde_json::Value) -> Vec<String> {
        let node = match &self.groups_path {
            Some(path) => claim_at_path(claims, path),
            None => claims.get(&self.groups_field),
        };
        node.and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn claim_at_path<'a>(claims: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut node = claims;
    for segment in path.split('.') {
        node = node.get(segment)?;
    }
    Some(node)
}

/// Authenticates bearer JWTs: signature + standard claims, then the JTI
/// denylist, then principal resolution with JIT provisioning.
pub struct JwtAuthenticator {
    verifier: JwtVerifier,
    mapping: ClaimMapping,
    users: Arc<dyn UserRepository>,
    revoked_jtis: Arc<dyn RevokedJtiRepository>,
}

impl JwtAuthenticator {
    pub fn new(
        verifier: JwtVerifier,
        mapping: ClaimMapping,
        users: Arc<dyn UserRepository>,
        revoked_jtis: Arc<dyn RevokedJtiRepository>,
    ) -> Self {
        Self {
            verifier,
            mapping,
            users,
            revoked_jtis,
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn attempt(&self, credentials: &Credentials) -> Outcome {
        let Some(bearer) = credentials.bearer.as_deref() else {
            return Outcome::Decline;
        };
        // Opaque session tokens are not three dot-separated segments;
        // leave those to the session authenticator.
        if bearer.split('.').count() != 3 {
            return Outcome::Decline;
        }

        let claims = match self.verifier.verify(bearer).await {
            Ok(claims) => claims,
            Err(err) => return Outcome::Failure(err),
        };

        let jti = claims.get("jti").and_then(|v| v.as_str()).map(str::to_string);
        if let Some(jti) = &jti {
            match self.revoked_jtis.is_revoked(jti).await {
                Ok(true) => {
                    return Outcome::Failure(GridError::unauthenticated(
                        AuthReason::Revoked,
                        "token has been revoked",
                    ))
                }
                Ok(false) => {}
                Err(err) => return Outcome::Failure(err.into()),
            }
        }

        let Some(subject) = claims
            .get(&self.mapping.user_id_field)
            .and_then(|v| v.as_str())
        else {
            return Outcome::Failure(GridError::unauthenticated(
                AuthReason::Malformed,
                format!("token is missing the '{}' claim", self.mapping.user_id_field),
            ));
        };
        let email = claims
            .get(&self.mapping.email_field)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let display_name = claims
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(email);
        let groups = self.mapping.groups_from(&claims);

        let user = match jit_provision_user(self.users.as_ref(), subject, email, display_name).await
        {
            Ok(user) => user,
            Err(err) => return Outcome::Failure(err),
        };
        if user.disabled {
            return Outcome::Failure(GridError::permission_denied("user is disabled"));
        }
        if let Err(err) = self.users.update_last_used(user.id, Utc::now()).await {
            warn!(user = %user.id, error = %err, "failed to stamp last_used_at");
        }

        Outcome::Success(Authentication {
            principal: Principal::User(user),
            groups,
            credential: CredentialKind::Jwt,
            session_id: None,
            jti,
            issued_token: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_path_walks_nested_claims() {
        let claims = json!({"realm_access": {"roles": ["a", "b"]}});
        let mapping = ClaimMapping {
            groups_path: Some("realm_access.roles".into()),
            ..Default::default()
        };
        assert_eq!(mapping.groups_from(&claims), vec!["a", "b"]);
    }

    #[test]
    fn flat_field_is_the_default() {
        let claims = json!({"groups": ["dev"]});
        assert_eq!(ClaimMapping::default().groups_from(&claims), vec!["dev"]);
    }

    #[test]
    fn missing_groups_claim_is_empty() {
        let claims = json!({"sub": "u"});
        assert!(ClaimMapping::default().groups_from(&claims).is_empty());
        let mapping = ClaimMapping {
            groups_path: Some("a.b.c".into()),
            ..Default::default()
        };
        assert!(mapping.groups_from(&claims).is_empty());
    }

    #[test]
    fn non_string_group_entries_are_dropped() {
        let claims = json!({"groups": ["dev", 42, null]});
        assert_eq!(ClaimMapping::default().groups_from(&claims), vec!["dev"]);
    }
}
