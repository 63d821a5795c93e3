//! Error types for entity store operations.
//!
//! Each failure class maps to its own variant so callers can tell a retryable
//! backend failure apart from a misconfigured store.

use std::sync::Arc;

use thiserror::Error;

use crate::backend::{BackendError, MutationKind};

/// Error returned by [`EntityStore`](crate::store::EntityStore) operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The fetch or mutation collaborator failed. Passed through unchanged.
    #[error(transparent)]
    Backend(#[from] Arc<BackendError>),

    /// The store's backend does not offer this mutation.
    #[error("{operation} is not supported by this store")]
    Unsupported { operation: MutationKind },

    /// A mutation response is missing fields the store relies on.
    #[error("malformed {operation} response: missing `{field}`")]
    MalformedResponse {
        operation: MutationKind,
        field: &'static str,
    },

    #[error("invalid store configuration: {message}")]
    InvalidConfig { message: String },
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Capability and configuration errors are programming errors and never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Backend(_) | StoreError::MalformedResponse { .. }
        )
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &str {
        match self {
            StoreError::Backend(e) => e.code(),
            StoreError::Unsupported { .. } => "OPERATION_NOT_SUPPORTED",
            StoreError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            StoreError::InvalidConfig { .. } => "INVALID_CONFIG",
        }
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        StoreError::Backend(Arc::new(err))
    }
}
