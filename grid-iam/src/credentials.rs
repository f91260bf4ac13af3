//! What the transport extracted from a request, and what authentication
//! turns it into.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grid_core::id::QualifiedId;
use grid_data::{Principal, Role};

/// OAuth-style client credentials from a token request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Raw credential material for one request. The transport builds this
/// (after rewriting Terraform's `Basic <user>:<token>` shim to a plain
/// bearer); authenticators consume it. At most one authenticator will
/// claim it.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub client: Option<ClientCredentials>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn client(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: Some(ClientCredentials {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
            }),
            ..Default::default()
        }
    }
}

/// Which credential type authenticated the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    Session,
    Jwt,
    ClientCredentials,
}

/// The product of a successful authenticator: a resolved principal plus
/// credential metadata. Roles are attached afterwards by the IAM facade.
#[derive(Debug, Clone)]
pub struct Authentication {
    pub principal: Principal,
    /// Group memberships from the credential (JWT claim or session row).
    pub groups: Vec<String>,
    pub credential: CredentialKind,
    pub session_id: Option<Uuid>,
    pub jti: Option<String>,
    /// Set when the authenticator minted a new token (client credentials);
    /// the token endpoint returns it to the caller exactly once.
    pub issued_token: Option<String>,
}

/// A fully resolved request principal: identity plus effective roles.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub principal: Principal,
    pub roles: Vec<Role>,
    pub groups: Vec<String>,
    pub credential: CredentialKind,
    pub session_id: Option<Uuid>,
}

impl AuthenticatedPrincipal {
    pub fn id(&self) -> Uuid {
        self.principal.id()
    }

    pub fn qualified_id(&self) -> QualifiedId {
        self.principal.qualified_id()
    }

    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }
}
