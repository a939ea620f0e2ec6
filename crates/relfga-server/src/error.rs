//! Errors returned by queries and commands.

use relfga_storage::StorageError;

/// Errors surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The continuation token could not be decoded, was tampered with, or
    /// belongs to another pagination space. Restart from an empty token.
    #[error("invalid continuation token")]
    InvalidContinuationToken,

    /// The continuation token was minted under a different type filter.
    #[error("the type in the continuation token does not match the type in the request")]
    MismatchObjectType,

    /// A request field is out of range or malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The store does not exist or has been deleted.
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// A tuple in a write request already exists.
    #[error("{0}")]
    TupleAlreadyExists(StorageError),

    /// A tuple in a delete request does not exist.
    #[error("{0}")]
    TupleNotFound(StorageError),

    /// Failure while producing a response.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Any other datastore error.
    #[error(transparent)]
    Storage(StorageError),
}

impl ServerError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidContinuationToken => "invalid_continuation_token",
            ServerError::MismatchObjectType => "mismatch_object_type",
            ServerError::InvalidArgument { .. } => "validation_error",
            ServerError::StoreNotFound { .. } => "store_id_not_found",
            ServerError::TupleAlreadyExists(_) => "write_failed_due_to_invalid_input",
            ServerError::TupleNotFound(_) => "write_failed_due_to_invalid_input",
            ServerError::Internal { .. } => "internal_error",
            ServerError::Storage(e) if e.is_transient() => "unavailable",
            ServerError::Storage(_) => "internal_error",
        }
    }

    /// Returns true for errors caused by the request itself.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServerError::Internal { .. } | ServerError::Storage(_))
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::StoreNotFound { store_id } => ServerError::StoreNotFound { store_id },
            StorageError::InvalidInput { message } => ServerError::InvalidArgument { message },
            e @ StorageError::TupleAlreadyExists { .. } => ServerError::TupleAlreadyExists(e),
            e @ StorageError::TupleNotFound { .. } => ServerError::TupleNotFound(e),
            e => ServerError::Storage(e),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
