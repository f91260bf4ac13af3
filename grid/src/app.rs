//! Application assembly.

use std::sync::Arc;

use axum::Router;
use tracing::info;

use grid_core::config::{GridConfig, OidcMode};
use grid_core::GridError;
use grid_data::{InMemoryRepositories, Repositories};
use grid_http::AppState;
use grid_iam::{ClaimMapping, IamOptions, IamService, JwksKeyStore, JwtVerifier};
use grid_state::{AllowAllLabels, DependencyService, LabelPolicy, StateService};

use crate::refresher::spawn_refresher;

/// The composed server: repositories, services, and the router.
pub struct GridApp {
    pub config: GridConfig,
    pub repos: Repositories,
    pub iam: Arc<IamService>,
    pub states: Arc<StateService>,
    pub deps: Arc<DependencyService>,
    router: Router,
}

impl GridApp {
    /// Build everything from configuration with the default (allow-all)
    /// label policy.
    pub async fn from_config(config: GridConfig) -> Result<Self, GridError> {
        Self::with_label_policy(config, Arc::new(AllowAllLabels)).await
    }

    /// Build with a custom label-policy collaborator.
    pub async fn with_label_policy(
        config: GridConfig,
        policy: Arc<dyn LabelPolicy>,
    ) -> Result<Self, GridError> {
        let repos = build_repositories(&config).await?;

        let jwt = match &config.oidc.mode {
            OidcMode::External(idp) => {
                let jwks = Arc::new(JwksKeyStore::new(&config.oidc.jwks_url));
                Some((
                    JwtVerifier::new(jwks, &idp.issuer, &idp.client_id),
                    ClaimMapping::from_oidc(&config.oidc),
                ))
            }
            // Internal mode authenticates with grid's own sessions only.
            OidcMode::Internal { .. } => None,
        };

        let iam = Arc::new(IamService::new(
            repos.clone(),
            IamOptions {
                session_ttl_secs: config.session_ttl_secs,
                argon2: config.argon2,
                jwt,
            },
        ));
        iam.seed_system_roles().await?;
        // The cache must be warm before the first authorization decision.
        iam.refresh_group_role_cache().await?;

        let states = Arc::new(StateService::new(
            repos.clone(),
            policy,
            config.server_url.clone(),
        ));
        let deps = Arc::new(DependencyService::new(repos.clone()));

        let router = grid_http::router(AppState {
            iam: iam.clone(),
            states: states.clone(),
            deps: deps.clone(),
        });

        Ok(Self {
            config,
            repos,
            iam,
            states,
            deps,
            router,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind, start the cache refresher, and serve until ctrl-c.
    pub async fn serve(self, addr: &str) -> Result<(), GridError> {
        let refresher = spawn_refresher(
            self.iam.clone(),
            std::time::Duration::from_secs(self.config.cache_refresh_interval_secs),
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GridError::internal(format!("bind {addr}: {e}")))?;
        info!(%addr, server_url = %self.config.server_url, "grid listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            })
            .await
            .map_err(|e| GridError::internal(format!("server error: {e}")))?;

        refresher.abort();
        Ok(())
    }
}

async fn build_repositories(config: &GridConfig) -> Result<Repositories, GridError> {
    if config.database_url.starts_with("memory:") {
        info!("using in-memory repositories");
        return Ok(InMemoryRepositories::new());
    }
    let pool = grid_data_sqlx::connect(&config.database_url, config.max_db_connections).await?;
    Ok(grid_data_sqlx::repositories(pool))
}
