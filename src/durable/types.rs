//! Durable record types and the storage backend contract

use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::errors::DurableError;
use crate::blob::StreamingBlob;

/// Metadata stored next to every durable blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    /// Cache key the record belongs to
    pub key: String,
    /// MIME type captured at upload
    pub content_type: String,
    /// Content length in bytes
    pub size: u64,
    /// Creation generation of the blob that produced this record
    pub generation: u64,
    /// Seconds since epoch when the record was written
    pub stored_at: u64,
}

impl RecordMeta {
    /// Describe a closed blob about to be persisted under `key`
    pub fn for_blob(key: &str, blob: &StreamingBlob) -> Self {
        Self {
            key: key.to_string(),
            content_type: blob.content_type().to_string(),
            size: blob.len(),
            generation: blob.generation(),
            stored_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

/// A durable record opened for reading
///
/// The content is read incrementally; nothing beyond the metadata is in memory yet.
pub struct DurableRecord {
    pub meta: RecordMeta,
    pub content: Box<dyn Read + Send>,
}

impl DurableRecord {
    /// Read the whole content (tests only; serving streams it)
    #[cfg(test)]
    pub fn read_all(mut self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.content.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Result of a persist call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The record was written
    Written,
    /// A record from a newer blob already exists; nothing was written
    Superseded,
    /// No durable backend is configured
    Skipped,
}

/// Durable storage backend
///
/// Calls are blocking; the bridge runs them on the blocking thread pool.
pub trait DurableStore: Send + Sync + 'static {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Write a complete record, unless a newer generation is already stored
    fn persist(&self, meta: &RecordMeta, chunks: &[Bytes]) -> Result<PersistOutcome, DurableError>;

    /// Open a record for reading
    fn load(&self, key: &str) -> Result<DurableRecord, DurableError>;

    /// Read only the metadata of a record
    fn stat(&self, key: &str) -> Result<RecordMeta, DurableError>;

    /// Delete a record; returns whether one existed
    fn delete(&self, key: &str) -> Result<bool, DurableError>;

    /// Metadata of every stored record
    fn list(&self) -> Result<Vec<RecordMeta>, DurableError>;
}
