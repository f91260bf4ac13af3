//! Row-mapping helpers shared by the repositories.

use grid_data::{DataError, SchemaSource, ValidationStatus};
use grid_graph::EdgeStatus;

/// Map a driver error, turning unique-key violations into `Conflict`.
pub(crate) fn map_err(what: &str, err: sqlx::Error) -> DataError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return DataError::Conflict(what.to_string());
        }
    }
    DataError::database(err)
}

pub(crate) fn edge_status_from(text: &str) -> Result<EdgeStatus, DataError> {
    text.parse()
        .map_err(|e: String| DataError::Other(format!("edges.status: {e}")))
}

pub(crate) fn schema_source_to(source: SchemaSource) -> &'static str {
    match source {
        SchemaSource::Manual => "manual",
        SchemaSource::Inferred => "inferred",
    }
}

pub(crate) fn schema_source_from(text: &str) -> Result<SchemaSource, DataError> {
    match text {
        "manual" => Ok(SchemaSource::Manual),
        "inferred" => Ok(SchemaSource::Inferred),
        other => Err(DataError::Other(format!(
            "state_outputs.schema_source: unknown value '{other}'"
        ))),
    }
}

pub(crate) fn validation_status_to(status: ValidationStatus) -> &'static str {
    match status {
        ValidationStatus::Valid => "valid",
        ValidationStatus::Invalid => "invalid",
        ValidationStatus::Error => "error",
    }
}

pub(crate) fn validation_status_from(text: &str) -> Result<ValidationStatus, DataError> {
    match text {
        "valid" => Ok(ValidationStatus::Valid),
        "invalid" => Ok(ValidationStatus::Invalid),
        "error" => Ok(ValidationStatus::Error),
        other => Err(DataError::Other(format!(
            "state_outputs.validation_status: unknown value '{other}'"
        ))),
    }
}
