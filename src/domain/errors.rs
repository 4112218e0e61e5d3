//! Domain errors for the argus monitoring core.

use thiserror::Error;

/// Domain-level errors that can occur while checking targets or
/// persisting monitoring state.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("container host not defined: {0}")]
    HostNotDefined(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
