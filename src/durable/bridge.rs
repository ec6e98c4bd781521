//! Durability Bridge
//!
//! Connects the in-memory side to an optional [`DurableStore`]. Every backend call runs
//! on the blocking thread pool, outside any cache or blob lock.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::errors::DurableError;
use super::reader::record_stream;
use super::types::{DurableRecord, DurableStore, PersistOutcome, RecordMeta};
use crate::blob::{BlobStream, StreamingBlob};

/// A durable record ready to be streamed
pub struct LoadedRecord {
    pub meta: RecordMeta,
    pub body: BlobStream,
}

/// Write-through / read-through access to durable storage
#[derive(Clone)]
pub struct DurabilityBridge {
    backend: Option<Arc<dyn DurableStore>>,
}

impl DurabilityBridge {
    pub fn new(backend: Arc<dyn DurableStore>) -> Self {
        info!(backend = backend.name(), "Durable storage enabled");
        Self {
            backend: Some(backend),
        }
    }

    /// Bridge with no backend: nothing is persisted, nothing is found
    pub fn disabled() -> Self {
        info!("Durable storage disabled, running in-memory only");
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    async fn run<T, F>(&self, backend: &Arc<dyn DurableStore>, op: F) -> Result<T, DurableError>
    where
        F: FnOnce(&dyn DurableStore) -> Result<T, DurableError> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(backend);
        tokio::task::spawn_blocking(move || op(backend.as_ref()))
            .await
            .map_err(|e| DurableError::Task(e.to_string()))?
    }

    /// Write a closed blob's full content under `key`
    ///
    /// Marks the blob persisted once the durable copy exists (or a newer one does).
    pub async fn persist(
        &self,
        key: &str,
        blob: &Arc<StreamingBlob>,
    ) -> Result<PersistOutcome, DurableError> {
        let Some(backend) = &self.backend else {
            return Ok(PersistOutcome::Skipped);
        };
        if !blob.is_closed() {
            return Err(DurableError::Incomplete(key.to_string()));
        }

        let meta = RecordMeta::for_blob(key, blob);
        let chunks = blob.snapshot();
        let size = meta.size;

        let outcome = self
            .run(backend, move |store| store.persist(&meta, &chunks))
            .await
            .inspect_err(|e| warn!(key = key, error = %e, "Failed to persist blob"))?;

        blob.mark_persisted();
        debug!(key = key, size = size, outcome = ?outcome, "Persisted blob");
        Ok(outcome)
    }

    /// Open a durable record and stream its content chunk by chunk
    pub async fn load(&self, key: &str) -> Result<LoadedRecord, DurableError> {
        let Some(backend) = &self.backend else {
            return Err(DurableError::NotFound(key.to_string()));
        };

        let owned = key.to_string();
        let record: DurableRecord = self.run(backend, move |store| store.load(&owned)).await?;
        debug!(key = key, size = record.meta.size, "Streaming blob from durable storage");
        Ok(LoadedRecord {
            meta: record.meta.clone(),
            body: record_stream(record),
        })
    }

    /// Metadata of a durable record
    pub async fn stat(&self, key: &str) -> Result<RecordMeta, DurableError> {
        let Some(backend) = &self.backend else {
            return Err(DurableError::NotFound(key.to_string()));
        };

        let owned = key.to_string();
        self.run(backend, move |store| store.stat(&owned)).await
    }

    /// Delete the durable copy; absent records are not an error
    pub async fn delete(&self, key: &str) -> Result<bool, DurableError> {
        let Some(backend) = &self.backend else {
            return Ok(false);
        };

        let owned = key.to_string();
        self.run(backend, move |store| store.delete(&owned)).await
    }

    pub async fn list(&self) -> Result<Vec<RecordMeta>, DurableError> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };

        self.run(backend, |store| store.list()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;
    use bytes::Bytes;
    use futures::StreamExt;

    fn closed_blob(content: &'static [u8]) -> Arc<StreamingBlob> {
        let (_blob, mut writer) = StreamingBlob::create("text/plain");
        writer.append(Bytes::from_static(content)).unwrap();
        writer.close().unwrap()
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let bridge = DurabilityBridge::new(Arc::new(MemoryStore::new()));
        let blob = closed_blob(b"hello");

        let outcome = bridge.persist("/a/b", &blob).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Written);
        assert!(blob.is_persisted());

        let loaded = bridge.load("/a/b").await.unwrap();
        assert_eq!(loaded.meta.content_type, "text/plain");
        let chunks: Vec<_> = loaded.body.collect().await;
        assert_eq!(chunks, vec![Ok(Bytes::from_static(b"hello"))]);

        let meta = bridge.stat("/a/b").await.unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(bridge.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refuses_open_blob() {
        let bridge = DurabilityBridge::new(Arc::new(MemoryStore::new()));
        let (blob, _writer) = StreamingBlob::create("text/plain");

        let err = bridge.persist("/open", &blob).await.unwrap_err();
        assert!(matches!(err, DurableError::Incomplete(_)));
        assert!(!blob.is_persisted());
    }

    #[tokio::test]
    async fn test_delete() {
        let bridge = DurabilityBridge::new(Arc::new(MemoryStore::new()));
        bridge.persist("/k", &closed_blob(b"x")).await.unwrap();

        assert!(bridge.delete("/k").await.unwrap());
        assert!(!bridge.delete("/k").await.unwrap());
        assert!(matches!(bridge.load("/k").await, Err(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_disabled_bridge() {
        let bridge = DurabilityBridge::disabled();
        assert!(!bridge.is_enabled());
        assert_eq!(bridge.backend_name(), "none");

        let blob = closed_blob(b"data");
        assert_eq!(
            bridge.persist("/k", &blob).await.unwrap(),
            PersistOutcome::Skipped
        );
        assert!(matches!(bridge.load("/k").await, Err(e) if e.is_not_found()));
        assert!(bridge.stat("/k").await.unwrap_err().is_not_found());
        assert!(!bridge.delete("/k").await.unwrap());
        assert!(bridge.list().await.unwrap().is_empty());
    }
}
