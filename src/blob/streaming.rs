//! Streaming Blob
//!
//! A write-once, multi-read byte sequence. One producer appends chunks through a
//! [`BlobWriter`] while any number of readers attach and follow the content live,
//! each from offset 0. Readers wait on the blob's own [`Notify`] while they are
//! caught up; the producer wakes them on every append, close and fail.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::errors::BlobError;
use super::reader::BlobReader;

/// Last generation handed out, keeps generations strictly increasing
static LAST_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobStatus {
    /// Producer is still appending
    Open,
    /// Producer finished successfully
    Closed,
    /// Producer failed; readers surface the cause
    Failed(String),
}

impl BlobStatus {
    fn is_terminal(&self) -> bool {
        !matches!(self, BlobStatus::Open)
    }
}

/// What a reader finds at its cursor
#[derive(Debug)]
pub(super) enum ChunkState {
    Ready(Bytes),
    Pending,
    End,
    Failed(String),
}

/// Buffer and status, guarded together by the blob's mutex
struct BlobState {
    chunks: Vec<Bytes>,
    len: u64,
    status: BlobStatus,
}

/// One logical upload: content-type plus an append-only chunk sequence
pub struct StreamingBlob {
    /// MIME type, fixed at creation
    content_type: String,
    /// Creation order across all blobs (nanoseconds since epoch, strictly increasing)
    generation: u64,
    /// Chunks and status
    state: Mutex<BlobState>,
    /// Wakes readers waiting for more data
    notify: Notify,
    /// Currently attached readers (bookkeeping only)
    readers: AtomicUsize,
    /// Set once the durable copy has been written
    persisted: AtomicBool,
}

impl StreamingBlob {
    fn with_state(content_type: String, generation: u64, state: BlobState) -> Self {
        Self {
            content_type,
            generation,
            state: Mutex::new(state),
            notify: Notify::new(),
            readers: AtomicUsize::new(0),
            persisted: AtomicBool::new(false),
        }
    }

    /// Create an open blob and the single producer handle that may write to it
    pub fn create(content_type: impl Into<String>) -> (Arc<Self>, BlobWriter) {
        let blob = Arc::new(Self::with_state(
            content_type.into(),
            next_generation(),
            BlobState {
                chunks: Vec::new(),
                len: 0,
                status: BlobStatus::Open,
            },
        ));
        let writer = BlobWriter {
            blob: Arc::clone(&blob),
            finished: false,
        };
        (blob, writer)
    }

    fn state(&self) -> MutexGuard<'_, BlobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk to the tail and wake waiting readers
    ///
    /// Empty chunks are accepted and dropped.
    fn append(&self, chunk: Bytes) -> Result<(), BlobError> {
        {
            let mut state = self.state();
            if state.status.is_terminal() {
                return Err(BlobError::AlreadyClosed);
            }
            if chunk.is_empty() {
                return Ok(());
            }
            state.len += chunk.len() as u64;
            state.chunks.push(chunk);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Mark the blob complete and wake every reader so it can observe end of stream
    fn close(&self) -> Result<(), BlobError> {
        self.finish(BlobStatus::Closed)
    }

    /// Mark the blob failed; readers get the cause once they drain the buffered bytes
    fn fail(&self, cause: impl std::fmt::Display) -> Result<(), BlobError> {
        self.finish(BlobStatus::Failed(cause.to_string()))
    }

    fn finish(&self, status: BlobStatus) -> Result<(), BlobError> {
        {
            let mut state = self.state();
            if state.status.is_terminal() {
                return Err(BlobError::AlreadyClosed);
            }
            debug!(
                content_type = %self.content_type,
                size = state.len,
                chunks = state.chunks.len(),
                status = ?status,
                "Blob finished"
            );
            state.status = status;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Attach a new reader positioned at offset 0
    pub fn attach(self: &Arc<Self>) -> BlobReader {
        self.readers.fetch_add(1, Ordering::Relaxed);
        BlobReader::new(Arc::clone(self))
    }

    pub(super) fn detach(&self) {
        self.readers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(super) fn notify(&self) -> &Notify {
        &self.notify
    }

    pub(super) fn chunk_at(&self, index: usize) -> ChunkState {
        let state = self.state();
        if let Some(chunk) = state.chunks.get(index) {
            return ChunkState::Ready(chunk.clone());
        }
        match &state.status {
            BlobStatus::Open => ChunkState::Pending,
            BlobStatus::Closed => ChunkState::End,
            BlobStatus::Failed(cause) => ChunkState::Failed(cause.clone()),
        }
    }

    /// All chunks written so far (cheap reference-counted clones)
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.state().chunks.clone()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bytes written so far
    pub fn len(&self) -> u64 {
        self.state().len
    }

    pub fn status(&self) -> BlobStatus {
        self.state().status.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state().status == BlobStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state().status == BlobStatus::Closed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state().status, BlobStatus::Failed(_))
    }

    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Relaxed)
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }

    /// Record that the durable copy is complete
    pub fn mark_persisted(&self) {
        self.persisted.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for StreamingBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("StreamingBlob")
            .field("content_type", &self.content_type)
            .field("generation", &self.generation)
            .field("len", &state.len)
            .field("status", &state.status)
            .field("readers", &self.reader_count())
            .finish()
    }
}

/// Exclusive producer handle for a [`StreamingBlob`]
///
/// Not cloneable. Dropping the handle while the blob is still open fails the blob,
/// so readers never wait on a producer that went away.
pub struct BlobWriter {
    blob: Arc<StreamingBlob>,
    finished: bool,
}

impl BlobWriter {
    pub fn append(&mut self, chunk: Bytes) -> Result<(), BlobError> {
        self.blob.append(chunk)
    }

    /// Close the blob, giving back the shared handle
    pub fn close(mut self) -> Result<Arc<StreamingBlob>, BlobError> {
        self.finished = true;
        self.blob.close()?;
        Ok(Arc::clone(&self.blob))
    }

    /// Fail the blob with the given cause
    pub fn fail(mut self, cause: impl std::fmt::Display) -> Result<Arc<StreamingBlob>, BlobError> {
        self.finished = true;
        self.blob.fail(cause)?;
        Ok(Arc::clone(&self.blob))
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.blob.fail("producer dropped before completion").is_ok() {
            warn!(
                content_type = %self.blob.content_type,
                size = self.blob.len(),
                "Producer abandoned open blob"
            );
        }
    }
}

fn next_generation() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut last = LAST_GENERATION.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_GENERATION.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_close() {
        let (blob, mut writer) = StreamingBlob::create("text/plain");
        writer.append(Bytes::from_static(b"hel")).unwrap();
        writer.append(Bytes::from_static(b"lo")).unwrap();
        assert!(blob.is_open());
        assert_eq!(blob.len(), 5);

        writer.close().unwrap();
        assert!(blob.is_closed());
        assert_eq!(blob.snapshot().concat(), b"hello");
        assert_eq!(blob.content_type(), "text/plain");
    }

    #[test]
    fn test_append_after_close_is_rejected() {
        let (blob, writer) = StreamingBlob::create("text/plain");
        writer.close().unwrap();

        assert_eq!(
            blob.append(Bytes::from_static(b"late")),
            Err(BlobError::AlreadyClosed)
        );
        assert_eq!(blob.close(), Err(BlobError::AlreadyClosed));
        assert_eq!(blob.fail("boom"), Err(BlobError::AlreadyClosed));
        assert_eq!(blob.len(), 0);
        assert!(blob.is_closed());
    }

    #[test]
    fn test_fail_is_terminal() {
        let (blob, writer) = StreamingBlob::create("application/octet-stream");
        writer.fail("connection reset").unwrap();

        assert_eq!(blob.status(), BlobStatus::Failed("connection reset".to_string()));
        assert_eq!(
            blob.append(Bytes::from_static(b"x")),
            Err(BlobError::AlreadyClosed)
        );
    }

    #[test]
    fn test_dropped_writer_fails_blob() {
        let (blob, mut writer) = StreamingBlob::create("text/plain");
        writer.append(Bytes::from_static(b"partial")).unwrap();
        drop(writer);

        assert!(blob.is_failed());
        assert_eq!(blob.len(), 7);
    }

    #[test]
    fn test_empty_chunks_are_ignored() {
        let (blob, mut writer) = StreamingBlob::create("text/plain");
        writer.append(Bytes::new()).unwrap();
        writer.append(Bytes::from_static(b"a")).unwrap();
        assert_eq!(blob.snapshot().len(), 1);
    }

    #[test]
    fn test_generations_increase() {
        let (a, _wa) = StreamingBlob::create("text/plain");
        let (b, _wb) = StreamingBlob::create("text/plain");
        assert!(b.generation() > a.generation());
    }

    #[test]
    fn test_reader_bookkeeping() {
        let (blob, _writer) = StreamingBlob::create("text/plain");
        let first = blob.attach();
        let second = blob.attach();
        assert_eq!(blob.reader_count(), 2);

        drop(first);
        assert_eq!(blob.reader_count(), 1);
        drop(second);
        assert_eq!(blob.reader_count(), 0);
    }
}
