//! Blob Store Manager
//!
//! Drives the streaming blob, the cache and the durability bridge for the four
//! request-level operations: fetch, probe, store and remove.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::errors::StoreError;
use super::key::Key;
use crate::blob::{BlobStream, BlobWriter, StreamingBlob};
use crate::cache::{BlobCache, MetadataCache};
use crate::durable::{DurabilityBridge, PersistOutcome, RecordMeta};

/// Where a fetched or probed blob came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobSource {
    /// Resident in the blob cache (possibly still uploading)
    Memory,
    /// Rebuilt from durable storage
    Durable,
}

impl BlobSource {
    /// Value for the `X-Cache` response header
    pub fn cache_header(&self) -> &'static str {
        match self {
            BlobSource::Memory => "HIT",
            BlobSource::Durable => "MISS",
        }
    }
}

/// A blob ready to be streamed to a client
pub struct Fetched {
    pub content_type: String,
    pub source: BlobSource,
    pub body: BlobStream,
}

/// Existence and type of a blob, without its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub content_type: String,
    /// Bytes available so far
    pub size: u64,
    /// False while the upload is still in flight
    pub complete: bool,
    pub source: BlobSource,
}

impl Probe {
    fn from_meta(meta: RecordMeta) -> Self {
        Self {
            content_type: meta.content_type,
            size: meta.size,
            complete: true,
            source: BlobSource::Durable,
        }
    }
}

/// Outcome of a successful store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    pub key: String,
    pub size: u64,
    pub generation: u64,
    /// Whether this upload's content was written to durable storage
    pub persisted: bool,
}

/// Drops a published blob from the cache unless disarmed
///
/// Covers both error returns and a store future that is dropped mid-upload.
struct PublishGuard<'a> {
    cache: &'a BlobCache,
    key: &'a str,
    blob: Arc<StreamingBlob>,
    armed: bool,
}

impl PublishGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.cache.remove_if_current(self.key, &self.blob) {
            debug!(key = self.key, "Withdrew unfinished blob from cache");
        }
    }
}

/// Owns the cache instance and the bridge to durable storage
pub struct BlobStore {
    cache: BlobCache,
    metadata: MetadataCache,
    bridge: DurabilityBridge,
}

impl BlobStore {
    pub fn new(cache: BlobCache, metadata: MetadataCache, bridge: DurabilityBridge) -> Self {
        Self {
            cache,
            metadata,
            bridge,
        }
    }

    /// Unbounded, memory-only store
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(
            BlobCache::new(None, false),
            MetadataCache::new(),
            DurabilityBridge::disabled(),
        )
    }

    #[cfg(test)]
    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    #[cfg(test)]
    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Resident blob for `key`, ignoring uploads that already failed
    fn resident(&self, key: &Key) -> Option<Arc<StreamingBlob>> {
        self.cache
            .get(key.as_str())
            .filter(|blob| !blob.is_failed())
    }

    /// Attach a reader to the current blob for `key`
    ///
    /// Falls back to streaming the record from durable storage when the key is not
    /// resident.
    pub async fn fetch(&self, key: &Key) -> Result<Fetched, StoreError> {
        if let Some(blob) = self.resident(key) {
            debug!(key = %key, open = blob.is_open(), "Serving blob from cache");
            return Ok(Fetched {
                content_type: blob.content_type().to_string(),
                source: BlobSource::Memory,
                body: blob.attach().into_stream(),
            });
        }

        let record = self.bridge.load(key.as_str()).await?;
        debug!(key = %key, size = record.meta.size, "Serving blob from durable storage");
        Ok(Fetched {
            content_type: record.meta.content_type,
            source: BlobSource::Durable,
            body: record.body,
        })
    }

    /// Existence and content type of `key`
    pub async fn probe(&self, key: &Key) -> Result<Probe, StoreError> {
        if let Some(blob) = self.resident(key) {
            return Ok(Probe {
                content_type: blob.content_type().to_string(),
                size: blob.len(),
                complete: blob.is_closed(),
                source: BlobSource::Memory,
            });
        }

        if let Some(meta) = self.metadata.get(key.as_str()) {
            return Ok(Probe::from_meta(meta));
        }

        // A remove that starts while stat runs must win over this lookup
        let epoch = self.metadata.epoch();
        let meta = self.bridge.stat(key.as_str()).await?;
        self.metadata.insert_if_current(meta.clone(), epoch);
        Ok(Probe::from_meta(meta))
    }

    /// Publish a new blob for `key` and copy `body` into it
    ///
    /// The blob is visible to fetches before the first byte arrives. Once the body ends
    /// the blob is closed and persisted; an upload superseded by a newer one for the same
    /// key, or removed, is not persisted.
    pub async fn store<S, E>(
        &self,
        key: &Key,
        content_type: &str,
        body: S,
    ) -> Result<StoreReceipt, StoreError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let (blob, writer) = StreamingBlob::create(content_type);

        self.metadata.invalidate(key.as_str());
        let replaced = self.cache.put(key.as_str(), Arc::clone(&blob)).is_some();
        let guard = PublishGuard {
            cache: &self.cache,
            key: key.as_str(),
            blob: Arc::clone(&blob),
            armed: true,
        };

        info!(
            key = %key,
            content_type = content_type,
            replaced = replaced,
            "Upload started"
        );

        if let Err(e) = copy_body(writer, body).await {
            warn!(key = %key, error = %e, received = blob.len(), "Upload failed");
            return Err(e);
        }

        let mut receipt = StoreReceipt {
            key: key.to_string(),
            size: blob.len(),
            generation: blob.generation(),
            persisted: false,
        };

        if !self.cache.is_current(key.as_str(), &blob) {
            guard.disarm();
            debug!(key = %key, "Upload superseded before persisting, skipping durable write");
            return Ok(receipt);
        }

        match self.bridge.persist(key.as_str(), &blob).await {
            Ok(outcome) => {
                guard.disarm();
                receipt.persisted = outcome == PersistOutcome::Written;
                self.metadata.invalidate(key.as_str());
                self.cache.evict_if_needed();
                info!(
                    key = %key,
                    size = receipt.size,
                    persisted = receipt.persisted,
                    "Upload complete"
                );
                Ok(receipt)
            }
            Err(e) => {
                // Guard drops the blob from the cache so the failed store is not served
                error!(key = %key, error = %e, "Upload could not be persisted");
                Err(StoreError::persistence(key.as_str(), e))
            }
        }
    }

    /// Remove `key` from the cache and from durable storage
    ///
    /// Readers already attached to the removed blob keep draining it.
    pub async fn remove(&self, key: &Key) -> Result<(), StoreError> {
        let cached = self.cache.remove(key.as_str()).is_some();
        self.metadata.invalidate(key.as_str());
        let durable = self.bridge.delete(key.as_str()).await?;
        // Drop anything a concurrent lookup cached while the delete was running
        self.metadata.invalidate(key.as_str());

        if !cached && !durable {
            return Err(StoreError::NotFound(key.to_string()));
        }

        info!(key = %key, cached = cached, durable = durable, "Blob removed");
        Ok(())
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        self.cache.log_metrics();
        self.metadata.log_metrics();
    }
}

/// Copy the inbound body into the blob, closing it on success and failing it on error
async fn copy_body<S, E>(mut writer: BlobWriter, body: S) -> Result<Arc<StreamingBlob>, StoreError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    tokio::pin!(body);
    while let Some(frame) = body.next().await {
        match frame {
            Ok(chunk) => writer.append(chunk)?,
            Err(e) => {
                let cause = e.to_string();
                writer.fail(&cause)?;
                return Err(StoreError::UpstreamBroken(cause));
            }
        }
    }
    Ok(writer.close()?)
}
