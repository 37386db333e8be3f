use thiserror::Error;

use super::types::{EntityId, ObjectIdentity};

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Entity {0} is not tracked by the registry")]
    NotTracked(ObjectIdentity),

    #[error("Unit of work has no connection")]
    NoConnection,

    #[error("No data mapper registered for entity type '{0}'")]
    MissingDataMapper(String),

    #[error("Commit failed: {0}")]
    CommitFailed(#[source] Box<OrmError>),

    #[error("Entity {0} does not belong to this registry")]
    UnknownEntity(ObjectIdentity),

    #[error("Entity of type '{0}' was handed where '{1}' is expected")]
    EntityTypeMismatch(String, &'static str),

    #[error("Id type mismatch: {0}")]
    IdTypeMismatch(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Transaction error: {0}")]
    TransactionState(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Row {1} not found in table '{0}'")]
    RowNotFound(String, EntityId),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl OrmError {
    /// Wraps a failure raised while writing entities inside a transaction.
    pub fn commit_failed(cause: OrmError) -> Self {
        Self::CommitFailed(Box::new(cause))
    }

    /// Returns the underlying cause when this is a `CommitFailed` error.
    pub fn commit_cause(&self) -> Option<&OrmError> {
        match self {
            Self::CommitFailed(cause) => Some(&**cause),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl<T> From<std::sync::PoisonError<T>> for OrmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_failed_keeps_cause() {
        let err = OrmError::commit_failed(OrmError::RowNotFound("User".into(), EntityId::Int(7)));
        assert!(matches!(err.commit_cause(), Some(OrmError::RowNotFound(_, _))));
        assert_eq!(
            err.to_string(),
            "Commit failed: Row 7 not found in table 'User'"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_entity_type_mismatch_names_both_types() {
        let err = OrmError::EntityTypeMismatch("orders".into(), "User");
        assert_eq!(
            err.to_string(),
            "Entity of type 'orders' was handed where 'User' is expected"
        );
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err: OrmError = anyhow::anyhow!("socket closed").into();
        assert_eq!(err.to_string(), "socket closed");
    }
}
