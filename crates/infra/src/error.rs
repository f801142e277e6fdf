//! Repository and storage error model.
//!
//! Two layers:
//!
//! - [`StorageError`]: faults raised by a [`StorageBackend`](crate::session::StorageBackend)
//!   (connectivity, constraints, malformed queries, unsupported operations).
//! - [`RepositoryError`]: what repository operations return. Storage faults are
//!   carried unchanged inside [`RepositoryError::Storage`]; the only storage
//!   variant that is lifted is `Unsupported`, which callers treat differently
//!   from a fault.

use thiserror::Error;

/// Result type for storage backends.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Storage backend fault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be reached (pool closed, I/O, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// A constraint was violated (duplicate key, foreign key, check).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The store rejected or failed to run a statement.
    #[error("query error: {0}")]
    Query(String),

    /// The backend cannot run the requested operation at all.
    #[error("operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Internal backend state is unusable (e.g. poisoned lock).
    #[error("backend state error: {0}")]
    State(String),
}

impl StorageError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { backend, operation }
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

/// Repository operation error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The existence check is enabled and the target record is absent.
    #[error("entity of type {entity_type} with id {id} not found")]
    NotFound {
        /// Short name of the entity type.
        entity_type: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// The backend cannot execute the requested operation.
    #[error("operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// The caller passed something the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A record could not be converted to or from its row form.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Fault raised by the storage backend, propagated unchanged.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl RepositoryError {
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<StorageError> for RepositoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unsupported { backend, operation } => {
                Self::Unsupported { backend, operation }
            }
            other => Self::Storage(other),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
