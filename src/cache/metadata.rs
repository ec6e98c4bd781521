//! Metadata Cache Implementation
//!
//! Caches durable record metadata using Moka so repeated probes of blobs that are no
//! longer resident do not re-read sidecar files. Entries are invalidated whenever the
//! key is stored or deleted; the TTL bounds staleness otherwise.
//!
//! Every invalidation advances an epoch. A lookup that went to durable storage caches its
//! answer only if no invalidation happened since it started, so a stat that raced a
//! delete cannot resurrect the deleted record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::durable::RecordMeta;

/// Default TTL for record metadata
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(300);

/// Maximum number of cached metadata entries
const MAX_ENTRIES: u64 = 100_000;

/// Durable record metadata cache with TTL support
pub struct MetadataCache {
    /// Metadata by key
    records: Cache<String, RecordMeta>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
    /// Invalidation count; held while inserting so check and insert are atomic
    epoch: Mutex<u64>,
}

impl MetadataCache {
    /// Create a new metadata cache with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_METADATA_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        let records = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(MAX_ENTRIES)
            .name("record_metadata_cache")
            .build();

        Self {
            records,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            epoch: Mutex::new(0),
        }
    }

    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get record metadata from cache
    ///
    /// Updates hit/miss counters.
    pub fn get(&self, key: &str) -> Option<RecordMeta> {
        match self.records.get(key) {
            Some(meta) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = key, "Cache HIT for record metadata");
                Some(meta)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = key, "Cache MISS for record metadata");
                None
            }
        }
    }

    /// Current invalidation epoch; take it before reading durable storage
    pub fn epoch(&self) -> u64 {
        *self.lock_epoch()
    }

    /// Cache `meta` unless any key was invalidated since `epoch` was taken
    pub fn insert_if_current(&self, meta: RecordMeta, epoch: u64) -> bool {
        let current = self.lock_epoch();
        if *current != epoch {
            trace!(key = %meta.key, "Skipped caching metadata read before an invalidation");
            return false;
        }
        debug!(key = %meta.key, "Cached record metadata");
        self.records.insert(meta.key.clone(), meta);
        true
    }

    /// Invalidate a key's cached metadata
    ///
    /// Call this when the key is stored or deleted.
    pub fn invalidate(&self, key: &str) {
        let mut epoch = self.lock_epoch();
        *epoch += 1;
        self.records.invalidate(key);
        trace!(key = key, "Invalidated record metadata");
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            entries = self.records.entry_count(),
            "Metadata cache metrics"
        );
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
