use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical error kinds exposed on every wire surface.
///
/// The string forms are stable; clients and the control-plane CLI match on
/// them, so renaming a kind is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Conflict,
    Unauthenticated,
    PermissionDenied,
    Locked,
    FailedPrecondition,
    CycleDetected,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Locked => "locked",
            ErrorKind::FailedPrecondition => "failed-precondition",
            ErrorKind::CycleDetected => "cycle-detected",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an authentication attempt failed terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthReason {
    Expired,
    Revoked,
    Missing,
    Malformed,
}

impl AuthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthReason::Expired => "expired",
            AuthReason::Revoked => "revoked",
            AuthReason::Missing => "missing",
            AuthReason::Malformed => "malformed",
        }
    }
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type shared by every grid service.
///
/// Each variant carries a human phrase and, where applicable, the resource
/// identifier or the conflicting value. Secret material never goes in here;
/// the `Locked` payload is the holder's lock metadata verbatim, because
/// Terraform displays it to the user on a 423.
#[derive(Debug)]
pub enum GridError {
    InvalidArgument(String),
    NotFound {
        resource: String,
    },
    AlreadyExists {
        resource: String,
    },
    Conflict(String),
    Unauthenticated {
        reason: AuthReason,
        message: String,
    },
    PermissionDenied(String),
    Locked {
        resource: String,
        /// The current holder's LockInfo as wire JSON, for Terraform to display.
        lock: Option<serde_json::Value>,
    },
    FailedPrecondition(String),
    CycleDetected(String),
    Internal(String),
}

impl GridError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        GridError::InvalidArgument(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        GridError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        GridError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        GridError::Conflict(msg.into())
    }

    pub fn unauthenticated(reason: AuthReason, msg: impl Into<String>) -> Self {
        GridError::Unauthenticated {
            reason,
            message: msg.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        GridError::PermissionDenied(msg.into())
    }

    pub fn locked(resource: impl Into<String>, lock: Option<serde_json::Value>) -> Self {
        GridError::Locked {
            resource: resource.into(),
            lock,
        }
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        GridError::FailedPrecondition(msg.into())
    }

    pub fn cycle_detected(msg: impl Into<String>) -> Self {
        GridError::CycleDetected(msg.into())
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        GridError::Internal(msg.to_string())
    }

    /// The canonical kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GridError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            GridError::NotFound { .. } => ErrorKind::NotFound,
            GridError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            GridError::Conflict(_) => ErrorKind::Conflict,
            GridError::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            GridError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            GridError::Locked { .. } => ErrorKind::Locked,
            GridError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            GridError::CycleDetected(_) => ErrorKind::CycleDetected,
            GridError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The authentication sub-reason, when this is an `Unauthenticated` error.
    pub fn auth_reason(&self) -> Option<AuthReason> {
        match self {
            GridError::Unauthenticated { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            GridError::NotFound { resource } => write!(f, "{resource} not found"),
            GridError::AlreadyExists { resource } => write!(f, "{resource} already exists"),
            GridError::Conflict(msg) => write!(f, "conflict: {msg}"),
            GridError::Unauthenticated { reason, message } => {
                write!(f, "unauthenticated ({reason}): {message}")
            }
            GridError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            GridError::Locked { resource, .. } => write!(f, "{resource} is locked"),
            GridError::FailedPrecondition(msg) => write!(f, "precondition failed: {msg}"),
            GridError::CycleDetected(msg) => write!(f, "cycle detected: {msg}"),
            GridError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GridError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ErrorKind::InvalidArgument.as_str(), "invalid-argument");
        assert_eq!(ErrorKind::CycleDetected.as_str(), "cycle-detected");
        assert_eq!(ErrorKind::FailedPrecondition.as_str(), "failed-precondition");
        assert_eq!(
            serde_json::to_string(&ErrorKind::PermissionDenied).unwrap(),
            r#""permission-denied""#
        );
    }

    #[test]
    fn display_carries_resource() {
        let err = GridError::not_found("state prod-net");
        assert_eq!(err.to_string(), "state prod-net not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unauthenticated_carries_reason() {
        let err = GridError::unauthenticated(AuthReason::Expired, "session expired");
        assert_eq!(err.auth_reason(), Some(AuthReason::Expired));
        assert!(err.to_string().contains("expired"));
    }
}
