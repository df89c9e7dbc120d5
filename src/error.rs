//! Error types for graph listeners.

use crate::types::ReferenceKind;
use thiserror::Error;

/// Errors surfaced by the backing document store.
///
/// These arrive asynchronously on a subscription's error channel and are
/// forwarded to the caller untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Main error type for listener operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// A key holds a link sub-query but does not end with the link suffix.
    #[error("Malformed query key `{key}`: link fields must end with `{suffix}`")]
    MalformedQueryKey { key: String, suffix: String },

    /// A followed link field holds something other than a reference.
    #[error("Malformed reference in field `{key}`: expected a reference, got {found}")]
    MalformedReference { key: String, found: String },

    /// An existing listener was asked to follow a reference of another kind.
    #[error("Query type mismatch for `{key}`: listener is {from}, reference is {to}")]
    QueryTypeMismatch {
        key: String,
        from: ReferenceKind,
        to: ReferenceKind,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GraphError {
    /// Whether this error came from the store rather than from the query.
    pub fn is_store_error(&self) -> bool {
        matches!(self, GraphError::Store(_))
    }
}

/// Result type for listener operations.
pub type Result<T> = std::result::Result<T, GraphError>;
