//! Streaming Blob Error Types
//!
//! Errors raised by a blob's producer handle and surfaced to its readers.

/// Blob-level error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("Blob already closed, no further writes accepted")]
    AlreadyClosed,

    #[error("Upstream broken: {0}")]
    UpstreamBroken(String),

    /// Durable content could not be read back
    #[error("Stored content unreadable: {0}")]
    Unreadable(String),
}
