//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store not found (or soft-deleted).
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// Store already exists.
    #[error("store already exists: {store_id}")]
    StoreAlreadyExists { store_id: String },

    /// Attempted to write a tuple that is already present in the store.
    #[error("cannot write a tuple which already exists: {object}#{relation}@{user}")]
    TupleAlreadyExists {
        object: String,
        relation: String,
        user: String,
    },

    /// Attempted to delete a tuple that is not present in the store.
    #[error("cannot delete a tuple which does not exist: {object}#{relation}@{user}")]
    TupleNotFound {
        object: String,
        relation: String,
        user: String,
    },

    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Query exceeded its configured timeout.
    #[error("query timeout after {timeout:?}: {operation}")]
    QueryTimeout { operation: String, timeout: Duration },

    /// Transaction error.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Returns true for errors caused by the backend being unavailable or slow,
    /// as opposed to errors caused by the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError { .. }
                | StorageError::QueryTimeout { .. }
                | StorageError::TransactionError { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::ConnectionError {
            message: "refused".to_string()
        }
        .is_transient());
        assert!(StorageError::QueryTimeout {
            operation: "read_changes".to_string(),
            timeout: Duration::from_secs(1),
        }
        .is_transient());
        assert!(!StorageError::StoreNotFound {
            store_id: "s".to_string()
        }
        .is_transient());
        assert!(!StorageError::InvalidInput {
            message: "bad".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_tuple_errors_render_full_key() {
        let err = StorageError::TupleAlreadyExists {
            object: "repo:openfga".to_string(),
            relation: "admin".to_string(),
            user: "maria".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot write a tuple which already exists: repo:openfga#admin@maria"
        );
    }
}
