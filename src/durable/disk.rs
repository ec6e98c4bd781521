//! Local Disk Store
//!
//! Persists completed blobs under a data directory. Each record is named after the
//! SHA-1 of its key: `<digest>.<generation>.blob` holds the content and
//! `<digest>.meta.json` holds its [`RecordMeta`]. Files are fanned out into
//! subdirectories by the first two hex digits and written atomically through a
//! temp file and rename.
//!
//! The metadata file is the commit point. Content for a new generation is written
//! next to the committed one, so an interrupted write leaves the previous record
//! intact plus an orphan content file that the next startup removes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::errors::DurableError;
use super::types::{DurableRecord, DurableStore, PersistOutcome, RecordMeta};

const BLOB_EXT: &str = "blob";
const META_SUFFIX: &str = ".meta.json";
const TMP_EXT: &str = "tmp";

/// Durable store backed by the local file system
pub struct DiskStore {
    /// Root directory for records
    data_dir: PathBuf,
    /// Writers (persist, delete) exclude readers so a record is never seen half replaced
    lock: RwLock<()>,
}

impl DiskStore {
    /// Open (and create if needed) a store rooted at `data_dir`
    pub fn new(data_dir: PathBuf) -> Result<Self, DurableError> {
        fs::create_dir_all(&data_dir).map_err(|e| {
            DurableError::io(
                format!("Failed to create data directory {}", data_dir.display()),
                e,
            )
        })?;

        let store = Self {
            data_dir,
            lock: RwLock::new(()),
        };

        // Clean up temp files and orphaned content left by previous runs
        store.cleanup();

        info!(data_dir = %store.data_dir.display(), "Disk store initialized");

        Ok(store)
    }

    /// Convert a key to its record directory and file stem
    fn record_location(&self, key: &str) -> (PathBuf, String) {
        let digest = format!("{:x}", Sha1::digest(key.as_bytes()));
        let dir = self.data_dir.join(&digest[..2]);
        (dir, digest)
    }

    fn blob_path(&self, key: &str, generation: u64) -> PathBuf {
        let (dir, stem) = self.record_location(key);
        dir.join(format!("{}.{}.{}", stem, generation, BLOB_EXT))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let (dir, stem) = self.record_location(key);
        dir.join(format!("{}{}", stem, META_SUFFIX))
    }

    fn read_meta(&self, key: &str) -> Result<RecordMeta, DurableError> {
        let path = self.meta_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DurableError::NotFound(key.to_string()))
            }
            Err(e) => {
                return Err(DurableError::io(
                    format!("Failed to read metadata {}", path.display()),
                    e,
                ))
            }
        };

        let meta: RecordMeta = serde_json::from_slice(&raw).map_err(|e| DurableError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        if meta.key != key {
            return Err(DurableError::Corrupt {
                key: key.to_string(),
                reason: format!("metadata belongs to {}", meta.key),
            });
        }

        Ok(meta)
    }

    /// Write `path` atomically from the given writer closure
    fn write_atomic<F>(&self, path: &Path, write: F) -> Result<(), DurableError>
    where
        F: FnOnce(&mut fs::File) -> io::Result<()>,
    {
        let parent = path.parent().unwrap_or(&self.data_dir);
        fs::create_dir_all(parent).map_err(|e| {
            DurableError::io(
                format!("Failed to create record directory {}", parent.display()),
                e,
            )
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(&format!(".{}", TMP_EXT))
            .tempfile_in(parent)
            .map_err(|e| DurableError::io("Failed to create temp file", e))?;

        write(tmp.as_file_mut())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| DurableError::io(format!("Failed to write {}", path.display()), e))?;

        tmp.persist(path).map_err(|e| {
            DurableError::io(format!("Failed to persist {}", path.display()), e.error)
        })?;

        Ok(())
    }

    /// Remove every content file of `key` except the one for `keep`
    fn remove_blobs_except(&self, key: &str, keep: Option<u64>) -> Result<bool, DurableError> {
        let (dir, digest) = self.record_location(key);
        let files = match fs::read_dir(&dir) {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(DurableError::io(
                    format!("Failed to list {}", dir.display()),
                    e,
                ))
            }
        };

        let mut removed = false;
        for entry in files.flatten() {
            let path = entry.path();
            match parse_blob_name(&path) {
                Some((stem, generation)) if stem == digest && Some(generation) != keep => {
                    removed |= remove_if_exists(&path)?;
                }
                _ => {}
            }
        }
        Ok(removed)
    }

    /// Clean up temp files and content files no committed metadata points at
    pub fn cleanup(&self) {
        let Ok(read_dir) = fs::read_dir(&self.data_dir) else {
            return;
        };
        for dir in read_dir.flatten().filter(|e| e.path().is_dir()) {
            let Ok(files) = fs::read_dir(dir.path()) else {
                continue;
            };
            for entry in files.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == TMP_EXT) {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                    continue;
                }
                let Some((stem, generation)) = parse_blob_name(&path) else {
                    continue;
                };
                let committed = fs::read(dir.path().join(format!("{}{}", stem, META_SUFFIX)))
                    .ok()
                    .and_then(|raw| serde_json::from_slice::<RecordMeta>(&raw).ok())
                    .map(|meta| meta.generation);
                if committed != Some(generation) {
                    debug!(path = %path.display(), "Removing orphaned content file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

/// Split `<digest>.<generation>.blob` into its digest and generation
fn parse_blob_name(path: &Path) -> Option<(&str, u64)> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_suffix(BLOB_EXT)?.strip_suffix('.')?;
    let (stem, generation) = rest.split_once('.')?;
    Some((stem, generation.parse().ok()?))
}

fn remove_if_exists(path: &Path) -> Result<bool, DurableError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DurableError::io(
            format!("Failed to remove {}", path.display()),
            e,
        )),
    }
}

impl DurableStore for DiskStore {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn persist(&self, meta: &RecordMeta, chunks: &[Bytes]) -> Result<PersistOutcome, DurableError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        match self.read_meta(&meta.key) {
            Ok(existing) if existing.generation > meta.generation => {
                debug!(
                    key = %meta.key,
                    stored = existing.generation,
                    incoming = meta.generation,
                    "Newer record already on disk, skipping write"
                );
                return Ok(PersistOutcome::Superseded);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(DurableError::Corrupt { key, reason }) => {
                warn!(key = %key, reason = %reason, "Overwriting corrupt record");
            }
            Err(e) => return Err(e),
        }

        self.write_atomic(&self.blob_path(&meta.key, meta.generation), |file| {
            for chunk in chunks {
                file.write_all(chunk)?;
            }
            Ok(())
        })?;

        let encoded = serde_json::to_vec_pretty(meta).map_err(|e| DurableError::Corrupt {
            key: meta.key.clone(),
            reason: e.to_string(),
        })?;
        self.write_atomic(&self.meta_path(&meta.key), |file| file.write_all(&encoded))?;

        // Committed; older content is unreachable now
        if let Err(e) = self.remove_blobs_except(&meta.key, Some(meta.generation)) {
            warn!(key = %meta.key, error = %e, "Failed to remove superseded content");
        }

        debug!(key = %meta.key, size = meta.size, generation = meta.generation, "Stored record on disk");
        Ok(PersistOutcome::Written)
    }

    fn load(&self, key: &str) -> Result<DurableRecord, DurableError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        let meta = self.read_meta(key)?;
        let path = self.blob_path(key, meta.generation);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DurableError::Corrupt {
                    key: key.to_string(),
                    reason: "content file missing".to_string(),
                })
            }
            Err(e) => {
                return Err(DurableError::io(
                    format!("Failed to open {}", path.display()),
                    e,
                ))
            }
        };

        let found = file
            .metadata()
            .map_err(|e| DurableError::io(format!("Failed to stat {}", path.display()), e))?
            .len();
        if found != meta.size {
            return Err(DurableError::Corrupt {
                key: key.to_string(),
                reason: format!("expected {} bytes, found {}", meta.size, found),
            });
        }

        Ok(DurableRecord {
            meta,
            content: Box::new(file),
        })
    }

    fn stat(&self, key: &str) -> Result<RecordMeta, DurableError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        self.read_meta(key)
    }

    fn delete(&self, key: &str) -> Result<bool, DurableError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        // Metadata first: a record without metadata is invisible to readers
        let had_meta = remove_if_exists(&self.meta_path(key))?;
        let had_blob = self.remove_blobs_except(key, None)?;

        debug!(key = key, existed = had_meta || had_blob, "Deleted record from disk");
        Ok(had_meta || had_blob)
    }
    fn list(&self) -> Result<Vec<RecordMeta>, DurableError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        let read_dir = fs::read_dir(&self.data_dir).map_err(|e| {
            DurableError::io(
                format!("Failed to list {}", self.data_dir.display()),
                e,
            )
        })?;

        let mut records = Vec::new();
        for dir in read_dir.flatten().filter(|e| e.path().is_dir()) {
            let Ok(files) = fs::read_dir(dir.path()) else {
                continue;
            };
            for entry in files.flatten() {
                let path = entry.path();
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(META_SUFFIX) && !n.starts_with('.'));
                if !is_meta {
                    continue;
                }
                match fs::read(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|raw| serde_json::from_slice::<RecordMeta>(&raw).map_err(|e| e.to_string()))
                {
                    Ok(meta) => records.push(meta),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable metadata"),
                }
            }
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
