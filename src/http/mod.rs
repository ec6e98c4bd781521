//! HTTP transport for the blob store

pub mod protocol;
pub mod server;

pub use server::{spawn_metrics_task, start_server, ServerState};
