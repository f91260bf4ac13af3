//! Error kind → HTTP mapping for the control-plane API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use grid_core::{ErrorKind, GridError};

/// Status code for a canonical error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::Locked => StatusCode::LOCKED,
        ErrorKind::FailedPrecondition => StatusCode::BAD_REQUEST,
        ErrorKind::CycleDetected => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON-API wrapper around [`GridError`].
///
/// Bodies carry the canonical kind string, the human phrase, and any
/// structured payload (the conflicting lock, the auth sub-reason) without
/// ever leaking secret material.
pub struct ApiError(pub GridError);

impl From<GridError> for ApiError {
    fn from(err: GridError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let kind = err.kind();
        let mut body = serde_json::json!({
            "error": {
                "kind": kind.as_str(),
                "message": err.to_string(),
            }
        });
        match &err {
            GridError::Locked {
                lock: Some(holder), ..
            } => {
                body["error"]["lock"] = holder.clone();
            }
            GridError::Unauthenticated { reason, .. } => {
                body["error"]["reason"] = serde_json::json!(reason.as_str());
            }
            GridError::NotFound { resource } | GridError::AlreadyExists { resource } => {
                body["error"]["resource"] = serde_json::json!(resource);
            }
            _ => {}
        }
        (status_for(kind), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::AuthReason;

    #[test]
    fn kinds_map_to_the_protocol_status_codes() {
        assert_eq!(status_for(ErrorKind::Locked), StatusCode::LOCKED);
        assert_eq!(status_for(ErrorKind::CycleDetected), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::Unauthenticated),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(ErrorKind::PermissionDenied),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn unauthenticated_body_carries_the_sub_reason() {
        let response =
            ApiError(GridError::unauthenticated(AuthReason::Expired, "session expired"))
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
