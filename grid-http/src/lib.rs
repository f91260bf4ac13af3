pub mod api;
pub mod error;
pub mod middleware;
pub mod tfstate;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;

use grid_iam::IamService;
use grid_state::{DependencyService, StateService};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub iam: Arc<IamService>,
    pub states: Arc<StateService>,
    pub deps: Arc<DependencyService>,
}

/// Build the full router: the Terraform backend protocol under
/// `/tfstate`, the control-plane API under `/api/v1`, and the public
/// token/health endpoints. Everything else runs behind the Basic-rewrite
/// and authentication middleware.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/tfstate/{guid}",
            get(tfstate::get_state).post(tfstate::post_state),
        )
        .route("/tfstate/{guid}/lock", any(tfstate::lock_state))
        .route("/tfstate/{guid}/unlock", any(tfstate::unlock_state))
        .merge(api::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .layer(axum::middleware::from_fn(middleware::rewrite_basic_bearer));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/v1/auth/token", post(api::token))
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
