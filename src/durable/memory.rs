//! In-memory durable store
//!
//! Selected with `PERSISTENCE=memory`: records outlive cache eviction but not the
//! process. Also the backend most store tests run against.

use std::collections::HashMap;
use std::io;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;

use super::errors::DurableError;
use super::types::{DurableRecord, DurableStore, PersistOutcome, RecordMeta};

/// `DurableStore` that keeps records in a map
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, (RecordMeta, Bytes)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn persist(&self, meta: &RecordMeta, chunks: &[Bytes]) -> Result<PersistOutcome, DurableError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        if let Some((existing, _)) = records.get(&meta.key) {
            if existing.generation > meta.generation {
                return Ok(PersistOutcome::Superseded);
            }
        }

        records.insert(meta.key.clone(), (meta.clone(), Bytes::from(chunks.concat())));
        Ok(PersistOutcome::Written)
    }

    fn load(&self, key: &str) -> Result<DurableRecord, DurableError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let (meta, content) = records
            .get(key)
            .ok_or_else(|| DurableError::NotFound(key.to_string()))?;
        Ok(DurableRecord {
            meta: meta.clone(),
            content: Box::new(io::Cursor::new(content.clone())),
        })
    }

    fn stat(&self, key: &str) -> Result<RecordMeta, DurableError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| DurableError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<bool, DurableError> {
        Ok(self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }

    fn list(&self) -> Result<Vec<RecordMeta>, DurableError> {
        let mut metas: Vec<RecordMeta> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(meta, _)| meta.clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryStore::new();
        let meta = RecordMeta {
            key: "/k".to_string(),
            content_type: "text/plain".to_string(),
            size: 4,
            generation: 2,
            stored_at: 0,
        };

        store
            .persist(&meta, &[Bytes::from_static(b"ab"), Bytes::from_static(b"cd")])
            .unwrap();
        assert_eq!(store.load("/k").unwrap().read_all().unwrap(), b"abcd");
        assert_eq!(store.stat("/k").unwrap(), meta);
        assert_eq!(store.list().unwrap().len(), 1);

        let older = RecordMeta {
            generation: 1,
            ..meta.clone()
        };
        assert_eq!(
            store.persist(&older, &[Bytes::from_static(b"zzzz")]).unwrap(),
            PersistOutcome::Superseded
        );

        assert!(store.delete("/k").unwrap());
        assert!(store.is_empty());
        assert!(store.stat("/k").unwrap_err().is_not_found());
    }
}
