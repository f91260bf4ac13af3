mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use uuid::Uuid;

use common::{bearer, body_json, harness, Harness};

async fn post_json(
    h: &Harness,
    token: &str,
    uri: &str,
    body: serde_json::Value,
) -> axum::http::Response<Body> {
    h.send(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn get(h: &Harness, token: &str, uri: &str) -> axum::http::Response<Body> {
    h.send(
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(token))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn create_state(h: &Harness, token: &str, logic_id: &str) -> Uuid {
    let guid = Uuid::now_v7();
    let response = post_json(
        h,
        token,
        "/api/v1/states",
        json!({"guid": guid.to_string(), "logic_id": logic_id}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    guid
}

// ── states ──

#[tokio::test]
async fn create_state_returns_backend_config() {
    let h = harness().await;
    let token = h.user_token("admin", "platform-engineer").await;
    let guid = Uuid::now_v7();
    let response = post_json(
        &h,
        &token,
        "/api/v1/states",
        json!({"guid": guid.to_string(), "logic_id": "prod-net", "labels": {"env": "prod"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(
        body["address"],
        format!("{}/tfstate/{guid}", common::SERVER_URL)
    );
    assert!(body["lock_address"].as_str().unwrap().ends_with("/lock"));
}

#[tokio::test]
async fn duplicate_state_is_a_409_with_the_kind() {
    let h = harness().await;
    let token = h.user_token("admin", "platform-engineer").await;
    create_state(&h, &token, "prod-net").await;
    let response = post_json(
        &h,
        &token,
        "/api/v1/states",
        json!({"guid": Uuid::now_v7().to_string(), "logic_id": "prod-net"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["kind"], "already-exists");
}

#[tokio::test]
async fn scoped_creation_is_403_out_of_constraints() {
    let h = harness().await;
    let token = h.user_token("dev", "product-engineer").await;
    let response = post_json(
        &h,
        &token,
        "/api/v1/states",
        json!({"guid": Uuid::now_v7().to_string(), "logic_id": "prod-net", "labels": {"env": "prod"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["error"]["kind"],
        "permission-denied"
    );
}

#[tokio::test]
async fn listing_is_visibility_filtered() {
    let h = harness().await;
    let admin = h.user_token("admin", "platform-engineer").await;
    let dev = h.user_token("dev", "product-engineer").await;

    let prod_guid = Uuid::now_v7();
    post_json(
        &h,
        &admin,
        "/api/v1/states",
        json!({"guid": prod_guid.to_string(), "logic_id": "prod-net", "labels": {"env": "prod"}}),
    )
    .await;
    post_json(
        &h,
        &dev,
        "/api/v1/states",
        json!({"guid": Uuid::now_v7().to_string(), "logic_id": "dev-net", "labels": {"env": "dev"}}),
    )
    .await;

    let admin_view = body_json(get(&h, &admin, "/api/v1/states").await).await;
    assert_eq!(admin_view["states"].as_array().unwrap().len(), 2);

    let dev_view = body_json(get(&h, &dev, "/api/v1/states?include_labels=true").await).await;
    let rows = dev_view["states"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["logic_id"], "dev-net");
    assert_eq!(rows[0]["labels"]["env"], "dev");
}

#[tokio::test]
async fn state_config_resolves_by_logic_id() {
    let h = harness().await;
    let token = h.user_token("admin", "platform-engineer").await;
    let guid = create_state(&h, &token, "prod-net").await;
    let body = body_json(get(&h, &token, "/api/v1/states/prod-net/config").await).await;
    assert_eq!(body["guid"], guid.to_string());
    assert!(body["backend"]["unlock_address"]
        .as_str()
        .unwrap()
        .ends_with("/unlock"));
}

// ── dependencies ──

#[tokio::test]
async fn dependency_lifecycle_over_http() {
    let h = harness().await;
    let token = h.user_token("admin", "platform-engineer").await;
    create_state(&h, &token, "net").await;
    create_state(&h, &token, "app").await;

    let response = post_json(
        &h,
        &token,
        "/api/v1/dependencies",
        json!({"from": "net", "from_output": "vpc_id", "to": "app"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["already_exists"], false);
    assert_eq!(body["edge"]["to_input_name"], "net_vpc_id");
    let edge_id = body["edge"]["id"].as_str().unwrap().to_string();

    // Idempotent duplicate.
    let response = post_json(
        &h,
        &token,
        "/api/v1/dependencies",
        json!({"from": "net", "from_output": "vpc_id", "to": "app"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["already_exists"], true);

    // Search by output key.
    let body = body_json(get(&h, &token, "/api/v1/dependencies/search?output=vpc_id").await).await;
    assert_eq!(body["edges"].as_array().unwrap().len(), 1);

    // Status report for the consumer.
    let body = body_json(get(&h, &token, "/api/v1/states/app/status").await).await;
    assert_eq!(body["freshness"], "stale");
    assert_eq!(body["incoming"][0]["status"], "pending");
    assert_eq!(body["incoming"][0]["from_logic_id"], "net");

    // Remove it.
    let response = h
        .send(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/v1/dependencies/{edge_id}"))
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn cycles_are_409_cycle_detected() {
    let h = harness().await;
    let token = h.user_token("admin", "platform-engineer").await;
    create_state(&h, &token, "a").await;
    create_state(&h, &token, "b").await;
    post_json(
        &h,
        &token,
        "/api/v1/dependencies",
        json!({"from": "a", "from_output": "x", "to": "b"}),
    )
    .await;

    let response = post_json(
        &h,
        &token,
        "/api/v1/dependencies",
        json!({"from": "b", "from_output": "y", "to": "a"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["kind"], "cycle-detected");
}

#[tokio::test]
async fn topological_order_validates_direction() {
    let h = harness().await;
    let token = h.user_token("admin", "platform-engineer").await;
    create_state(&h, &token, "solo").await;

    let response = get(&h, &token, "/api/v1/states/solo/order?direction=DOWNSTREAM").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["layers"].as_array().unwrap().len(), 1);

    let response = get(&h, &token, "/api/v1/states/solo/order?direction=sideways").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["kind"],
        "invalid-argument"
    );
}

// ── IAM over HTTP ──

#[tokio::test]
async fn client_credentials_token_grant_and_me() {
    let h = harness().await;
    let admin = h.user_token("admin", "platform-engineer").await;

    let response = post_json(
        &h,
        &admin,
        "/api/v1/iam/service-accounts",
        json!({"name": "deployer", "description": "CI"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let client_id = created["service_account"]["client_id"].as_str().unwrap().to_string();
    let client_secret = created["client_secret"].as_str().unwrap().to_string();
    // The stored hash never leaves the server.
    assert!(created["service_account"].get("client_secret_hash").is_none());

    // Bind the service-account role.
    let response = post_json(
        &h,
        &admin,
        "/api/v1/iam/service-accounts/deployer/roles",
        json!({"roles": ["service-account"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Exchange credentials for a bearer.
    let response = h
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!(
                    "grant_type=client_credentials&client_id={client_id}&client_secret={client_secret}"
                )))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let token_body = body_json(response).await;
    assert_eq!(token_body["token_type"], "Bearer");
    let sa_token = token_body["access_token"].as_str().unwrap().to_string();

    let me = body_json(get(&h, &sa_token, "/api/v1/iam/me").await).await;
    assert!(me["principal"].as_str().unwrap().starts_with("sa:"));
    assert_eq!(me["credential"], "session");
    assert!(me["permissions"]["roles"]
        .as_array()
        .unwrap()
        .contains(&json!("service-account")));
}

#[tokio::test]
async fn bad_client_credentials_are_401() {
    let h = harness().await;
    let response = h
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(
                    "grant_type=client_credentials&client_id=nope&client_secret=wrong",
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn iam_admin_is_required_for_service_account_management() {
    let h = harness().await;
    let dev = h.user_token("dev", "product-engineer").await;
    let response = post_json(
        &h,
        &dev,
        "/api/v1/iam/service-accounts",
        json!({"name": "rogue"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_role_names_fail_assignment_listing_them() {
    let h = harness().await;
    let admin = h.user_token("admin", "platform-engineer").await;
    post_json(
        &h,
        &admin,
        "/api/v1/iam/service-accounts",
        json!({"name": "deployer"}),
    )
    .await;
    let response = post_json(
        &h,
        &admin,
        "/api/v1/iam/service-accounts/deployer/roles",
        json!({"roles": ["service-account", "made-up"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("made-up"));
}

#[tokio::test]
async fn cache_refresh_endpoint_bumps_the_version() {
    let h = harness().await;
    let admin = h.user_token("admin", "platform-engineer").await;
    let first = body_json(post_json(&h, &admin, "/api/v1/iam/cache/refresh", json!({})).await).await;
    let second =
        body_json(post_json(&h, &admin, "/api/v1/iam/cache/refresh", json!({})).await).await;
    assert_eq!(
        second["version"].as_u64().unwrap(),
        first["version"].as_u64().unwrap() + 1
    );
}

#[tokio::test]
async fn logout_revokes_the_session() {
    let h = harness().await;
    let token = h.user_token("alice", "platform-engineer").await;

    let response = post_json(&h, &token, "/api/v1/auth/logout", json!({})).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&h, &token, "/api/v1/iam/me").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["reason"], "revoked");
}

#[tokio::test]
async fn jti_revocation_endpoint_is_admin_only() {
    let h = harness().await;
    let admin = h.user_token("admin", "platform-engineer").await;
    let response = post_json(
        &h,
        &admin,
        "/api/v1/iam/revocations",
        json!({
            "jti": "jti-1",
            "subject": "alice",
            "expires_at": "2026-12-31T00:00:00Z"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let dev = h.user_token("dev", "product-engineer").await;
    let response = post_json(
        &h,
        &dev,
        "/api/v1/iam/revocations",
        json!({"jti": "x", "subject": "y", "expires_at": "2026-12-31T00:00:00Z"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
