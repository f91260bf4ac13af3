pub mod authenticator;
pub mod client_credentials;
pub mod credentials;
pub mod group_cache;
pub mod jwks;
pub mod jwt;
pub mod password;
pub mod provision;
pub mod service;
pub mod session_auth;
pub mod token;

// Re-export primary public types for convenience.
pub use authenticator::{Authenticator, AuthenticatorChain, Outcome};
pub use client_credentials::ClientCredentialsAuthenticator;
pub use credentials::{
    AuthenticatedPrincipal, Authentication, ClientCredentials, CredentialKind, Credentials,
};
pub use group_cache::{GroupRoleCache, GroupRoleSnapshot};
pub use jwks::JwksKeyStore;
pub use jwt::{ClaimMapping, JwtAuthenticator, JwtVerifier};
pub use password::PasswordHasher;
pub use service::{IamOptions, IamService};
pub use session_auth::SessionAuthenticator;
