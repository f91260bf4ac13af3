//! Remote JWKS key material.
//!
//! Signing keys are fetched from the issuer's JWKS endpoint and cached by
//! `kid`. An unknown `kid` forces a refresh (key rotation), rate-limited
//! so a flood of bad tokens cannot hammer the IdP.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use grid_core::{AuthReason, GridError};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkEntry>,
}

/// One key from the JWKS document; only RSA components are consumed.
#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct Fetched {
    keys: HashMap<String, DecodingKey>,
    at: Option<Instant>,
    attempted_at: Option<Instant>,
}

/// Cache of an issuer's signing keys, indexed by `kid`.
pub struct JwksKeyStore {
    url: String,
    ttl: Duration,
    client: reqwest::Client,
    state: RwLock<Fetched>,
    fetch_gate: Mutex<()>,
}

impl JwksKeyStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_ttl(url, DEFAULT_TTL)
    }

    pub fn with_ttl(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            ttl,
            client: reqwest::Client::new(),
            state: RwLock::new(Fetched {
                keys: HashMap::new(),
                at: None,
                attempted_at: None,
            }),
            fetch_gate: Mutex::new(()),
        }
    }

    /// Look up the decoding key for a `kid`, refreshing from the endpoint
    /// when the cache is stale or the kid is unknown.
    pub async fn key_for(&self, kid: &str) -> Result<DecodingKey, GridError> {
        {
            let state = self.state.read().await;
            if let Some(key) = state.keys.get(kid) {
                if !stale(state.at, self.ttl) {
                    return Ok(key.clone());
                }
            }
        }

        self.fetch_if_allowed().await?;

        let state = self.state.read().await;
        state
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| {
                GridError::unauthenticated(
                    AuthReason::Malformed,
                    format!("token signed with unknown key id '{kid}'"),
                )
            })
    }

    /// Fetch, honoring the minimum interval between attempts. Serialized
    /// so concurrent misses produce a single request.
    async fn fetch_if_allowed(&self) -> Result<(), GridError> {
        let _gate = self.fetch_gate.lock().await;
        {
            let state = self.state.read().await;
            if let Some(attempted) = state.attempted_at {
                if attempted.elapsed() < MIN_FETCH_INTERVAL && state.at.is_some() {
                    return Ok(());
                }
            }
        }
        {
            let mut state = self.state.write().await;
            state.attempted_at = Some(Instant::now());
        }

        let document: JwksDocument = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GridError::internal(format!("JWKS fetch from {}: {e}", self.url)))?
            .json()
            .await
            .map_err(|e| GridError::internal(format!("JWKS parse: {e}")))?;

        let mut keys = HashMap::new();
        for entry in document.keys {
            let Some(kid) = entry.kid else { continue };
            match decode_entry(&entry.kty, entry.n.as_deref(), entry.e.as_deref()) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(reason) => warn!(kid, reason, "skipping JWKS entry"),
            }
        }
        debug!(url = %self.url, count = keys.len(), "JWKS refreshed");

        let mut state = self.state.write().await;
        state.keys = keys;
        state.at = Some(Instant::now());
        Ok(())
    }
}

fn decode_entry(
    kty: &str,
    n: Option<&str>,
    e: Option<&str>,
) -> Result<DecodingKey, &'static str> {
    match kty {
        "RSA" => {
            let (Some(n), Some(e)) = (n, e) else {
                return Err("RSA key missing n/e components");
            };
            DecodingKey::from_rsa_components(n, e).map_err(|_| "invalid RSA components")
        }
        _ => Err("unsupported key type"),
    }
}

fn stale(fetched_at: Option<Instant>, ttl: Duration) -> bool {
    match fetched_at {
        None => true,
        Some(at) => at.elapsed() >= ttl,
    }
}
