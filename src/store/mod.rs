//! Request-level blob operations over the cache and durable storage

pub mod errors;
pub mod key;
pub mod manager;

pub use errors::StoreError;
pub use key::Key;
pub use manager::BlobStore;
