//! Argon2 hashing for service-account secrets.
//!
//! Hashing and verification run on the blocking pool so a KDF tuned for
//! hundreds of milliseconds never stalls the async runtime.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version};

use grid_core::config::Argon2Cost;
use grid_core::GridError;

/// Cost-parameterized argon2id hasher.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: Argon2Cost,
}

impl PasswordHasher {
    pub fn new(cost: Argon2Cost) -> Self {
        Self { cost }
    }

    fn instance(&self) -> Result<Argon2<'static>, GridError> {
        let params = Params::new(
            self.cost.memory_kib,
            self.cost.iterations,
            self.cost.parallelism,
            None,
        )
        .map_err(|e| GridError::internal(format!("invalid argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash a secret for storage.
    pub async fn hash(&self, secret: &str) -> Result<String, GridError> {
        let argon2 = self.instance()?;
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(secret.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| GridError::internal(format!("password hashing failed: {e}")))
        })
        .await
        .map_err(GridError::internal)?
    }

    /// Verify a presented secret against a stored hash. The hash string
    /// carries its own cost parameters, so this works across re-tunings.
    pub async fn verify(&self, secret: &str, stored_hash: &str) -> Result<bool, GridError> {
        let secret = secret.to_string();
        let stored_hash = stored_hash.to_string();
        tokio::task::spawn_blocking(move || {
            let Ok(parsed) = PasswordHash::new(&stored_hash) else {
                return Ok(false);
            };
            Ok(Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .map_err(GridError::internal)?
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(Argon2Cost::default())
    }
}
