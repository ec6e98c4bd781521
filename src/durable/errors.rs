//! Durable Storage Error Types

use std::io;

/// Errors from a [`super::types::DurableStore`] backend
#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Refusing to persist incomplete blob: {0}")]
    Incomplete(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl DurableError {
    /// Wrap an I/O error with a description of the failed step
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        DurableError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DurableError::NotFound(_))
    }
}
