use thiserror::Error;

use crate::database::StoreError;
use crate::folio::FolioError;
use crate::record::RecordError;
use crate::storage::StorageError;

/// Caller-facing error taxonomy. Each variant maps to one message and one kind.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::Validation { field: field.into(), reason: reason.into() }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        ServiceError::NotFound { entity: entity.into(), id: id.to_string() }
    }

    /// Machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "validation",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Unauthenticated => "unauthenticated",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Timeout => "timeout",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<RecordError> for ServiceError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::UniqueConstraintViolated(field) => {
                ServiceError::Conflict(format!("a record with the same '{}' already exists", field))
            }
            RecordError::NotFound { entity, id } => ServiceError::not_found(entity, id),
            RecordError::ForeignKeyViolated(field) => ServiceError::validation(field, "references a missing record"),
            RecordError::RequiredFieldMissing(field) => ServiceError::validation(field, "is required"),
            RecordError::SystemFieldNotAllowed(field) => ServiceError::validation(field, "is managed by the server"),
            RecordError::InvalidInput(reason) => ServiceError::validation("input", reason),
            RecordError::Unauthenticated => ServiceError::Unauthenticated,
            RecordError::Timeout => ServiceError::Timeout,
            RecordError::Unknown(cause) => {
                tracing::error!("Record layer error: {}", cause);
                ServiceError::Internal(cause)
            }
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        RecordError::from(err).into()
    }
}

impl From<FolioError> for ServiceError {
    fn from(err: FolioError) -> Self {
        match err {
            FolioError::Store(e) => e.into(),
            FolioError::Exhausted { .. } => ServiceError::Conflict(err.to_string()),
            FolioError::InvalidPrefix(_) | FolioError::InvalidYear(_) | FolioError::Malformed(_) => {
                tracing::error!("Folio configuration error: {}", err);
                ServiceError::Internal(err.to_string())
            }
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        tracing::error!("File store error: {}", err);
        ServiceError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_codes_reach_the_taxonomy() {
        let unique: ServiceError = StoreError::UniqueViolation("folio".to_string()).into();
        assert!(matches!(unique, ServiceError::Conflict(_)));

        let fk: ServiceError = StoreError::ForeignKeyViolation("id_brand".to_string()).into();
        assert!(matches!(fk, ServiceError::Validation { ref field, .. } if field == "id_brand"));

        let timeout: ServiceError = StoreError::Timeout.into();
        assert_eq!(timeout.kind(), "timeout");

        let backend: ServiceError = StoreError::Backend("boom".to_string()).into();
        assert_eq!(backend.kind(), "internal");
    }
}
