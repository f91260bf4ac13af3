//! Request middleware: the Terraform Basic-auth shim and authentication.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use grid_iam::Credentials;

use crate::error::ApiError;
use crate::AppState;

/// Terraform's HTTP backend can only send Basic auth, so its CLI is
/// configured with `username=gridapi, password=<bearer token>`. Rewrite
/// `Basic <any>:<token>` to `Bearer <token>` before authentication runs.
pub async fn rewrite_basic_bearer(mut request: Request<Body>, next: Next) -> Response {
    let basic_password = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic_password);
    if let Some(token) = basic_password {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
    }
    next.run(request).await
}

fn decode_basic_password(header: &str) -> Option<String> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (_username, password) = text.split_once(':')?;
    (!password.is_empty()).then(|| password.to_string())
}

/// Run the IAM authenticator chain and stash the resolved principal in
/// the request extensions for handlers to pick up.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let credentials = Credentials {
        bearer,
        user_agent,
        ..Default::default()
    };
    match state.iam.authenticate(&credentials).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => ApiError(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::decode_basic_password;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    fn encode(user: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
    }

    #[test]
    fn extracts_the_password_as_the_bearer() {
        assert_eq!(
            decode_basic_password(&encode("gridapi", "tok-123")),
            Some("tok-123".to_string())
        );
        // The username is irrelevant.
        assert_eq!(
            decode_basic_password(&encode("anything", "tok-123")),
            Some("tok-123".to_string())
        );
    }

    #[test]
    fn empty_or_malformed_basic_is_ignored() {
        assert_eq!(decode_basic_password(&encode("gridapi", "")), None);
        assert_eq!(decode_basic_password("Basic not-base64!!!"), None);
        assert_eq!(decode_basic_password("Bearer tok"), None);
    }
}
