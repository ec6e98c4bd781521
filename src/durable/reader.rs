//! Streaming reads of durable records
//!
//! A record is read one chunk at a time on the blocking pool, and only when the consumer
//! asks for the next chunk. A slow client therefore holds at most one chunk, and no
//! blocking thread, between reads.

use std::io::{self, Read};

use bytes::Bytes;
use futures::stream::StreamExt;
use tracing::warn;

use super::types::DurableRecord;
use crate::blob::{BlobError, BlobStream};

/// Bytes read from a durable record per chunk
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Read position within an opened record
struct RecordCursor {
    key: String,
    content: Box<dyn Read + Send>,
    size: u64,
    sent: u64,
}

impl RecordCursor {
    /// Read the next chunk, giving the cursor back for the following one
    async fn next_chunk(mut self) -> Result<(Self, Option<Bytes>), BlobError> {
        let (mut cursor, read) = tokio::task::spawn_blocking(move || {
            let read = read_chunk(&mut *self.content);
            (self, read)
        })
        .await
        .map_err(|e| BlobError::Unreadable(e.to_string()))?;

        match read {
            Ok(Some(chunk)) => {
                cursor.sent += chunk.len() as u64;
                Ok((cursor, Some(chunk)))
            }
            Ok(None) if cursor.sent == cursor.size => Ok((cursor, None)),
            Ok(None) => {
                warn!(key = %cursor.key, read = cursor.sent, expected = cursor.size, "Durable record truncated");
                Err(BlobError::Unreadable(format!(
                    "{} ended after {} of {} bytes",
                    cursor.key, cursor.sent, cursor.size
                )))
            }
            Err(e) => {
                warn!(key = %cursor.key, error = %e, "Failed to read durable record");
                Err(BlobError::Unreadable(format!("{}: {}", cursor.key, e)))
            }
        }
    }
}

fn read_chunk(content: &mut dyn Read) -> io::Result<Option<Bytes>> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match content.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(n) => {
                buf.truncate(n);
                return Ok(Some(Bytes::from(buf)));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Turn an opened record into a chunk stream that ends with an error item if the
/// content is unreadable or shorter than its metadata says
pub fn record_stream(record: DurableRecord) -> BlobStream {
    let cursor = RecordCursor {
        key: record.meta.key,
        content: record.content,
        size: record.meta.size,
        sent: 0,
    };

    futures::stream::unfold(Some(cursor), |state| async move {
        let cursor = state?;
        match cursor.next_chunk().await {
            Ok((cursor, Some(chunk))) => Some((Ok(chunk), Some(cursor))),
            Ok((_, None)) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}
