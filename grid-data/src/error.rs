use grid_core::GridError;

/// Errors surfaced by repository implementations.
#[derive(Debug)]
pub enum DataError {
    /// The addressed row does not exist.
    NotFound(String),
    /// A uniqueness constraint was violated.
    Conflict(String),
    /// Backend/driver failure.
    Database(Box<dyn std::error::Error + Send + Sync>),
    Other(String),
}

impl DataError {
    /// Wrap a driver-specific error.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::NotFound(msg) => write!(f, "not found: {msg}"),
            DataError::Conflict(msg) => write!(f, "conflict: {msg}"),
            DataError::Database(err) => write!(f, "database error: {err}"),
            DataError::Other(msg) => write!(f, "data error: {msg}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<DataError> for GridError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => GridError::not_found(msg),
            DataError::Conflict(msg) => GridError::already_exists(msg),
            DataError::Database(e) => GridError::internal(e),
            DataError::Other(msg) => GridError::Internal(msg),
        }
    }
}
