//! Server configuration.
//!
//! Values come from an optional YAML file, with `GRID_*` environment
//! variables taking precedence over file values. Validation happens once,
//! at startup; the rest of the system receives an already-checked
//! [`GridConfig`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// How long a manual (signal-triggered) cache refresh may run.
pub const MANUAL_REFRESH_TIMEOUT_SECS: u64 = 5;

/// Configuration load / validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Load(String),
    Missing(&'static str),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "failed to load configuration: {msg}"),
            ConfigError::Missing(key) => write!(f, "missing required configuration: {key}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// External identity provider settings.
///
/// `Debug` redacts the client secret so the struct can be logged.
#[derive(Clone, Deserialize)]
pub struct ExternalIdp {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub cli_client_id: String,
}

impl fmt::Debug for ExternalIdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalIdp")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("cli_client_id", &self.cli_client_id)
            .finish()
    }
}

/// Which identity provider issues tokens for this deployment.
#[derive(Clone, Debug)]
pub enum OidcMode {
    /// grid's own session issuance backs the webapp/CLI.
    Internal { issuer: String, client_id: String },
    /// An external IdP issues JWTs; users are JIT-provisioned.
    External(ExternalIdp),
}

impl OidcMode {
    pub fn issuer(&self) -> &str {
        match self {
            OidcMode::Internal { issuer, .. } => issuer,
            OidcMode::External(idp) => &idp.issuer,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, OidcMode::External(_))
    }
}

/// OIDC settings: the provider mode plus claim-mapping knobs.
#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub mode: OidcMode,
    /// Claim holding the group list (default `groups`).
    pub groups_claim_field: String,
    /// Claim holding the stable user id (default `sub`).
    pub user_id_claim_field: String,
    /// Claim holding the email (default `email`).
    pub email_claim_field: String,
    /// Optional dotted path to the groups claim, overriding the flat field.
    pub groups_claim_path: Option<String>,
    /// JWKS endpoint; defaults to `{issuer}/.well-known/jwks.json`.
    pub jwks_url: String,
}

/// Argon2 cost parameters for service-account secret hashing.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Argon2Cost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Cost {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Fully validated server configuration.
#[derive(Clone, Debug)]
pub struct GridConfig {
    /// Database connection string; `memory://` selects the in-memory
    /// repositories (dev and tests).
    pub database_url: String,
    /// Public base URL, used to derive Terraform backend addresses.
    pub server_url: String,
    pub oidc: OidcConfig,
    /// Group→role cache refresh period in seconds (default 300).
    pub cache_refresh_interval_secs: u64,
    /// Connection-pool ceiling (default 25).
    pub max_db_connections: u32,
    /// Session lifetime in seconds (default 8 hours).
    pub session_ttl_secs: u64,
    pub argon2: Argon2Cost,
}

// Raw file shape before env overrides and validation.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    database_url: Option<String>,
    server_url: Option<String>,
    cache_refresh_interval: Option<u64>,
    max_db_connections: Option<u32>,
    session_ttl: Option<u64>,
    #[serde(default)]
    oidc: RawOidc,
    argon2: Option<Argon2Cost>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOidc {
    issuer: Option<String>,
    client_id: Option<String>,
    external_idp: Option<ExternalIdp>,
    groups_claim_field: Option<String>,
    user_id_claim_field: Option<String>,
    email_claim_field: Option<String>,
    groups_claim_path: Option<String>,
    jwks_url: Option<String>,
}

impl GridConfig {
    /// Load from the conventional sources: the file named by `GRID_CONFIG`
    /// (default `grid.yaml`, skipped when absent) overridden by `GRID_*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("GRID_CONFIG").unwrap_or_else(|_| "grid.yaml".to_string());
        let file = if Path::new(&path).exists() {
            Some(
                std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Load(format!("{path}: {e}")))?,
            )
        } else {
            None
        };
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(file.as_deref(), &env)
    }

    /// Build from an optional YAML document and an environment map.
    /// Environment keys take precedence over file values.
    pub fn from_sources(
        yaml: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut raw: RawConfig = match yaml {
            Some(text) => {
                serde_yaml::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?
            }
            None => RawConfig::default(),
        };
        apply_env(&mut raw, env)?;
        validate(raw)
    }
}

fn apply_env(raw: &mut RawConfig, env: &HashMap<String, String>) -> Result<(), ConfigError> {
    let get = |key: &str| env.get(key).cloned();

    if let Some(v) = get("GRID_DATABASE_URL") {
        raw.database_url = Some(v);
    }
    if let Some(v) = get("GRID_SERVER_URL") {
        raw.server_url = Some(v);
    }
    if let Some(v) = get("GRID_CACHE_REFRESH_INTERVAL") {
        raw.cache_refresh_interval = Some(parse_env("GRID_CACHE_REFRESH_INTERVAL", &v)?);
    }
    if let Some(v) = get("GRID_MAX_DB_CONNECTIONS") {
        raw.max_db_connections = Some(parse_env("GRID_MAX_DB_CONNECTIONS", &v)?);
    }
    if let Some(v) = get("GRID_SESSION_TTL") {
        raw.session_ttl = Some(parse_env("GRID_SESSION_TTL", &v)?);
    }
    if let Some(v) = get("GRID_OIDC_ISSUER") {
        raw.oidc.issuer = Some(v);
    }
    if let Some(v) = get("GRID_OIDC_CLIENT_ID") {
        raw.oidc.client_id = Some(v);
    }
    if let Some(v) = get("GRID_OIDC_GROUPS_CLAIM_FIELD") {
        raw.oidc.groups_claim_field = Some(v);
    }
    if let Some(v) = get("GRID_OIDC_USER_ID_CLAIM_FIELD") {
        raw.oidc.user_id_claim_field = Some(v);
    }
    if let Some(v) = get("GRID_OIDC_EMAIL_CLAIM_FIELD") {
        raw.oidc.email_claim_field = Some(v);
    }
    if let Some(v) = get("GRID_OIDC_GROUPS_CLAIM_PATH") {
        raw.oidc.groups_claim_path = Some(v);
    }
    if let Some(v) = get("GRID_OIDC_JWKS_URL") {
        raw.oidc.jwks_url = Some(v);
    }

    // The external-IdP block is all-or-nothing from the environment.
    if let Some(issuer) = get("GRID_OIDC_EXTERNAL_ISSUER") {
        let require = |key: &'static str| {
            get(key).ok_or(ConfigError::Invalid(format!(
                "GRID_OIDC_EXTERNAL_ISSUER is set but {key} is not"
            )))
        };
        raw.oidc.external_idp = Some(ExternalIdp {
            issuer,
            client_id: require("GRID_OIDC_EXTERNAL_CLIENT_ID")?,
            client_secret: require("GRID_OIDC_EXTERNAL_CLIENT_SECRET")?,
            redirect_uri: require("GRID_OIDC_EXTERNAL_REDIRECT_URI")?,
            cli_client_id: require("GRID_OIDC_EXTERNAL_CLI_CLIENT_ID")?,
        });
    }

    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse '{value}'")))
}

fn validate(raw: RawConfig) -> Result<GridConfig, ConfigError> {
    let database_url = raw
        .database_url
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::Missing("database_url"))?;
    let server_url = raw
        .server_url
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::Missing("server_url"))?
        .trim_end_matches('/')
        .to_string();

    let internal = raw.oidc.issuer.is_some() || raw.oidc.client_id.is_some();
    let mode = match (internal, raw.oidc.external_idp) {
        (true, Some(_)) => {
            return Err(ConfigError::Invalid(
                "oidc.issuer/client_id and oidc.external_idp are mutually exclusive".into(),
            ))
        }
        (false, Some(idp)) => OidcMode::External(idp),
        (true, None) => OidcMode::Internal {
            issuer: raw.oidc.issuer.ok_or(ConfigError::Missing("oidc.issuer"))?,
            client_id: raw
                .oidc
                .client_id
                .ok_or(ConfigError::Missing("oidc.client_id"))?,
        },
        (false, None) => return Err(ConfigError::Missing("oidc")),
    };

    let jwks_url = raw.oidc.jwks_url.unwrap_or_else(|| {
        format!(
            "{}/.well-known/jwks.json",
            mode.issuer().trim_end_matches('/')
        )
    });

    Ok(GridConfig {
        database_url,
        server_url,
        oidc: OidcConfig {
            mode,
            groups_claim_field: raw
                .oidc
                .groups_claim_field
                .unwrap_or_else(|| "groups".to_string()),
            user_id_claim_field: raw
                .oidc
                .user_id_claim_field
                .unwrap_or_else(|| "sub".to_string()),
            email_claim_field: raw
                .oidc
                .email_claim_field
                .unwrap_or_else(|| "email".to_string()),
            groups_claim_path: raw.oidc.groups_claim_path,
            jwks_url,
        },
        cache_refresh_interval_secs: raw.cache_refresh_interval.unwrap_or(300),
        max_db_connections: raw.max_db_connections.unwrap_or(25),
        session_ttl_secs: raw.session_ttl.unwrap_or(8 * 60 * 60),
        argon2: raw.argon2.unwrap_or_default(),
    })
}
