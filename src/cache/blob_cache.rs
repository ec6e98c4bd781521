//! Blob Cache
//!
//! Maps keys to the current [`StreamingBlob`] for that key. The structural lock guards
//! only the map itself and is never held while a blob is being written or read.
//! Uses LRU eviction when resident bytes exceed the configured maximum size.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::blob::{BlobStatus, StreamingBlob};

/// Default maximum resident size: 1 GB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Tracks a published blob and its recency for LRU eviction
struct CacheEntry {
    blob: Arc<StreamingBlob>,
    /// Logical access time (updated on each lookup)
    last_accessed: AtomicU64,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-memory key → blob map with bounded size
pub struct BlobCache {
    /// Maximum resident bytes (None = unbounded)
    max_size: Option<u64>,
    /// When set, closed blobs stay resident until their durable copy exists
    persistence_enabled: bool,
    /// Current blob per key
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Logical clock for recency
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlobCache {
    /// Create a cache
    ///
    /// # Arguments
    /// * `max_size` - Maximum resident bytes, `None` for unbounded
    /// * `persistence_enabled` - Whether closed blobs must be persisted before eviction
    pub fn new(max_size: Option<u64>, persistence_enabled: bool) -> Self {
        info!(
            max_size = ?max_size,
            persistence_enabled = persistence_enabled,
            "Blob cache initialized"
        );

        Self {
            max_size,
            persistence_enabled,
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Publish `blob` as the current entry for `key`
    ///
    /// Returns the blob it replaced. The replaced blob is left untouched, so readers
    /// already attached to it keep draining it.
    pub fn put(&self, key: &str, blob: Arc<StreamingBlob>) -> Option<Arc<StreamingBlob>> {
        let entry = CacheEntry {
            blob,
            last_accessed: AtomicU64::new(self.tick()),
        };
        let previous = self.write().insert(key.to_string(), entry).map(|e| e.blob);

        debug!(key = key, replaced = previous.is_some(), "Published blob");

        self.evict_if_needed();
        previous
    }

    /// Current blob for `key`, if resident
    pub fn get(&self, key: &str) -> Option<Arc<StreamingBlob>> {
        let entries = self.read();
        match entries.get(key) {
            Some(entry) => {
                entry.last_accessed.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = key, "Cache HIT");
                Some(Arc::clone(&entry.blob))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = key, "Cache MISS");
                None
            }
        }
    }

    /// Detach the current entry for `key`
    pub fn remove(&self, key: &str) -> Option<Arc<StreamingBlob>> {
        let removed = self.write().remove(key).map(|e| e.blob);
        debug!(key = key, found = removed.is_some(), "Removed blob from cache");
        removed
    }

    /// Detach the entry for `key` only if it still points at `blob`
    pub fn remove_if_current(&self, key: &str, blob: &Arc<StreamingBlob>) -> bool {
        let mut entries = self.write();
        let current = entries
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.blob, blob));
        if current {
            entries.remove(key);
            debug!(key = key, "Dropped blob from cache");
        }
        current
    }

    /// Whether `blob` is still the current entry for `key`
    pub fn is_current(&self, key: &str, blob: &Arc<StreamingBlob>) -> bool {
        self.read()
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.blob, blob))
    }

    fn is_evictable(&self, blob: &StreamingBlob) -> bool {
        match blob.status() {
            BlobStatus::Open => false,
            BlobStatus::Failed(_) => true,
            BlobStatus::Closed => !self.persistence_enabled || blob.is_persisted(),
        }
    }

    /// Clone out every entry so blob sizes can be read without holding the map lock
    fn resident(&self) -> Vec<(String, Arc<StreamingBlob>, u64)> {
        self.read()
            .iter()
            .map(|(key, entry)| {
                (
                    key.clone(),
                    Arc::clone(&entry.blob),
                    entry.last_accessed.load(Ordering::Relaxed),
                )
            })
            .collect()
    }

    /// Evict least recently used blobs if resident bytes exceed max size
    ///
    /// Open blobs, and closed blobs still waiting for their durable copy, are skipped.
    /// Sizing happens on a snapshot; the write lock is only taken to drop the chosen
    /// entries, and an entry republished in the meantime is left alone.
    /// Returns the number of evicted entries.
    pub fn evict_if_needed(&self) -> usize {
        let Some(max_size) = self.max_size else {
            return 0;
        };

        let sized: Vec<(String, Arc<StreamingBlob>, u64, u64)> = self
            .resident()
            .into_iter()
            .map(|(key, blob, last_accessed)| {
                let size = blob.len();
                (key, blob, last_accessed, size)
            })
            .collect();

        let total_size: u64 = sized.iter().map(|(_, _, _, size)| size).sum();
        if total_size <= max_size {
            return 0;
        }

        info!(
            total_mb = total_size / (1024 * 1024),
            max_mb = max_size / (1024 * 1024),
            "Cache exceeds max size, evicting LRU entries"
        );

        // Sort by last accessed (oldest first)
        let mut candidates: Vec<_> = sized
            .into_iter()
            .filter(|(_, blob, _, _)| self.is_evictable(blob))
            .collect();
        candidates.sort_by_key(|(_, _, last_accessed, _)| *last_accessed);

        let target = total_size - max_size;
        let mut planned: u64 = 0;
        let victims: Vec<_> = candidates
            .into_iter()
            .take_while(|(_, _, _, size)| {
                let take = planned < target;
                planned += size;
                take
            })
            .collect();

        let mut freed: u64 = 0;
        let mut evicted = 0;
        {
            let mut entries = self.write();
            for (key, blob, _, size) in &victims {
                let unchanged = entries
                    .get(key.as_str())
                    .is_some_and(|entry| Arc::ptr_eq(&entry.blob, blob));
                if unchanged {
                    entries.remove(key.as_str());
                    freed += size;
                    evicted += 1;
                    debug!(key = %key, size = size, "Evicted blob");
                }
            }
        }

        if freed < target {
            warn!(
                over_by = target - freed,
                "Cache still over max size; remaining blobs are streaming or awaiting persistence"
            );
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let resident = self.resident();
        CacheStats {
            entries: resident.len(),
            total_bytes: resident.iter().map(|(_, blob, _)| blob.len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        info!(
            entries = stats.entries,
            total_bytes = stats.total_bytes,
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "Blob cache metrics"
        );
    }
}
