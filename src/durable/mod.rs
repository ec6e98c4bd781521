//! Durable storage behind the in-memory cache

pub mod bridge;
pub mod disk;
pub mod errors;
pub mod memory;
pub mod reader;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use bridge::DurabilityBridge;
pub use disk::DiskStore;
pub use errors::DurableError;
pub use memory::MemoryStore;
pub use types::{PersistOutcome, RecordMeta};
