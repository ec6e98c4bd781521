//! Streaming blobs: one producer, many live readers

pub mod errors;
pub mod reader;
pub mod streaming;

pub use errors::BlobError;
pub use reader::BlobStream;
pub use streaming::{BlobStatus, BlobWriter, StreamingBlob};
