//! Caching layer
//!
//! The blob cache holds the current streaming blob per key; the metadata cache keeps
//! durable record metadata for probes of blobs that are no longer resident.

pub mod blob_cache;
pub mod metadata;

pub use blob_cache::BlobCache;
pub use metadata::MetadataCache;
