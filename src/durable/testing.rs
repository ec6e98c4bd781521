//! Test doubles for durable storage

use std::io;
use std::time::Duration;

use bytes::Bytes;

use super::errors::DurableError;
use super::memory::MemoryStore;
use super::types::{DurableRecord, DurableStore, PersistOutcome, RecordMeta};

/// Store whose writes always fail and which never holds anything
pub struct FailingStore;

impl DurableStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn persist(&self, _: &RecordMeta, _: &[Bytes]) -> Result<PersistOutcome, DurableError> {
        Err(DurableError::io(
            "Failed to write blob",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        ))
    }

    fn load(&self, key: &str) -> Result<DurableRecord, DurableError> {
        Err(DurableError::NotFound(key.to_string()))
    }

    fn stat(&self, key: &str) -> Result<RecordMeta, DurableError> {
        Err(DurableError::NotFound(key.to_string()))
    }

    fn delete(&self, _: &str) -> Result<bool, DurableError> {
        Ok(false)
    }

    fn list(&self) -> Result<Vec<RecordMeta>, DurableError> {
        Ok(Vec::new())
    }
}

/// Memory store whose deletes stall before touching the record
pub struct SlowDeleteStore {
    pub inner: MemoryStore,
    pub delay: Duration,
}

impl SlowDeleteStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

impl DurableStore for SlowDeleteStore {
    fn name(&self) -> &'static str {
        "slow-delete"
    }

    fn persist(&self, meta: &RecordMeta, chunks: &[Bytes]) -> Result<PersistOutcome, DurableError> {
        self.inner.persist(meta, chunks)
    }

    fn load(&self, key: &str) -> Result<DurableRecord, DurableError> {
        self.inner.load(key)
    }

    fn stat(&self, key: &str) -> Result<RecordMeta, DurableError> {
        self.inner.stat(key)
    }

    fn delete(&self, key: &str) -> Result<bool, DurableError> {
        std::thread::sleep(self.delay);
        self.inner.delete(key)
    }

    fn list(&self) -> Result<Vec<RecordMeta>, DurableError> {
        self.inner.list()
    }
}
