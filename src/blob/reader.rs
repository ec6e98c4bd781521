//! Blob Readers
//!
//! A reader owns its cursor and its own reference to the blob, so it keeps draining
//! the same content after the cache drops or replaces the key.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};

use super::errors::BlobError;
use super::streaming::{ChunkState, StreamingBlob};

/// Response body for a blob: chunks in order, ending with an error item on failure
pub type BlobStream = BoxStream<'static, Result<Bytes, BlobError>>;

/// Cursor over a [`StreamingBlob`]
pub struct BlobReader {
    blob: Arc<StreamingBlob>,
    /// Index of the next chunk to deliver
    cursor: usize,
}

impl BlobReader {
    pub(super) fn new(blob: Arc<StreamingBlob>) -> Self {
        Self { blob, cursor: 0 }
    }

    /// Next chunk in append order
    ///
    /// Waits while the reader has caught up with an open blob. Returns `Ok(None)` once
    /// every byte of a closed blob has been delivered, and the failure cause once every
    /// byte of a failed blob has been delivered.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, BlobError> {
        loop {
            // Register before looking so an append between the check and the wait is not lost
            let notified = self.blob.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.blob.chunk_at(self.cursor) {
                ChunkState::Ready(chunk) => {
                    self.cursor += 1;
                    return Ok(Some(chunk));
                }
                ChunkState::End => return Ok(None),
                ChunkState::Failed(cause) => return Err(BlobError::UpstreamBroken(cause)),
                ChunkState::Pending => notified.await,
            }
        }
    }

    /// Drain the remaining content into one buffer
    #[cfg(test)]
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, BlobError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Adapt into a byte stream that ends with an error item if the blob failed
    pub fn into_stream(self) -> BlobStream {
        futures::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        self.blob.detach();
    }
}
