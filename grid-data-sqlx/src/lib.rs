//! PostgreSQL repositories.
//!
//! Runtime-bound queries (no compile-time schema checking) against the
//! tables in `schema.sql`. Migrations are an external concern; this crate
//! assumes the schema exists.

mod edges;
mod iam;
mod rows;
mod states;

pub use edges::{SqlxEdgeRepository, SqlxStateOutputRepository};
pub use iam::{
    SqlxRevokedJtiRepository, SqlxRoleBindingRepository, SqlxRoleRepository,
    SqlxServiceAccountRepository, SqlxSessionRepository, SqlxUserRepository,
};
pub use states::SqlxStateRepository;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use grid_data::{DataError, Repositories};

/// Open a pool against `database_url`, capped at `max_connections`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DataError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(DataError::database)
}

/// Build the full repository bundle over one shared pool.
pub fn repositories(pool: PgPool) -> Repositories {
    Repositories {
        states: Arc::new(SqlxStateRepository::new(pool.clone())),
        state_outputs: Arc::new(SqlxStateOutputRepository::new(pool.clone())),
        edges: Arc::new(SqlxEdgeRepository::new(pool.clone())),
        users: Arc::new(SqlxUserRepository::new(pool.clone())),
        service_accounts: Arc::new(SqlxServiceAccountRepository::new(pool.clone())),
        sessions: Arc::new(SqlxSessionRepository::new(pool.clone())),
        revoked_jtis: Arc::new(SqlxRevokedJtiRepository::new(pool.clone())),
        roles: Arc::new(SqlxRoleRepository::new(pool.clone())),
        role_bindings: Arc::new(SqlxRoleBindingRepository::new(pool)),
    }
}
