//! Shared harness for router tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;

use grid_data::{InMemoryRepositories, Repositories};
use grid_http::{router, AppState};
use grid_iam::token::SessionParams;
use grid_iam::{IamOptions, IamService};
use grid_state::{AllowAllLabels, DependencyService, StateService};

pub const SERVER_URL: &str = "http://localhost:8080";

pub struct Harness {
    pub app: Router,
    pub repos: Repositories,
    pub iam: Arc<IamService>,
}

/// Full stack over in-memory repositories with the system roles seeded.
pub async fn harness() -> Harness {
    let repos = InMemoryRepositories::new();
    let iam = Arc::new(IamService::new(repos.clone(), IamOptions::default()));
    iam.seed_system_roles().await.unwrap();
    let states = Arc::new(StateService::new(
        repos.clone(),
        Arc::new(AllowAllLabels),
        SERVER_URL,
    ));
    let deps = Arc::new(DependencyService::new(repos.clone()));
    let app = router(AppState {
        iam: iam.clone(),
        states,
        deps,
    });
    Harness { app, repos, iam }
}

impl Harness {
    /// Provision a user, bind a role by name, and return a session token.
    pub async fn user_token(&self, subject: &str, role_name: &str) -> String {
        let user = self
            .iam
            .jit_provision_user(subject, &format!("{subject}@example.com"), subject)
            .await
            .unwrap();
        let role = self
            .iam
            .get_roles_by_name(&[role_name.to_string()])
            .await
            .unwrap()
            .found
            .remove(0);
        self.iam.assign_role_to_user(user.id, role.id).await.unwrap();
        let (_, token) = self
            .iam
            .login_user(user.id, SessionParams::default())
            .await
            .unwrap();
        token
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.app.clone().oneshot(request).await.unwrap()
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}
