//! Blob Store Error Types
//!
//! Operation-level errors for fetch, probe, store and delete.
//! Maps each variant to the HTTP status the transport answers with.

use axum::http::StatusCode;

use crate::blob::BlobError;
use crate::durable::DurableError;

/// Blob store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Blob already closed, producer misuse")]
    AlreadyClosed,

    #[error("Upstream broken: {0}")]
    UpstreamBroken(String),

    #[error("Stored content unreadable: {0}")]
    Unreadable(String),

    #[error("Persistence failed for {key}: {reason}")]
    Persistence { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[source] DurableError),
}

impl StoreError {
    /// Map the error to the HTTP status returned to the client
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::UpstreamBroken(_) => StatusCode::BAD_REQUEST,
            StoreError::AlreadyClosed
            | StoreError::Unreadable(_)
            | StoreError::Persistence { .. }
            | StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wrap a durable write failure for `key`
    pub fn persistence(key: &str, err: DurableError) -> Self {
        StoreError::Persistence {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<BlobError> for StoreError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::AlreadyClosed => StoreError::AlreadyClosed,
            BlobError::UpstreamBroken(cause) => StoreError::UpstreamBroken(cause),
            BlobError::Unreadable(cause) => StoreError::Unreadable(cause),
        }
    }
}

impl From<DurableError> for StoreError {
    fn from(err: DurableError) -> Self {
        match err {
            DurableError::NotFound(key) => StoreError::NotFound(key),
            other => StoreError::Storage(other),
        }
    }
}
