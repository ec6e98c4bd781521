//! Blobstream Daemon - streaming blob store over HTTP
//!
//! Uploads are readable while they are still arriving. Completed blobs are kept in an
//! LRU memory cache and persisted to a local data directory.

mod blob;
mod cache;
mod config;
mod durable;
mod http;
mod store;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use cache::{BlobCache, MetadataCache};
use config::{Config, Persistence};
use durable::{DiskStore, DurabilityBridge, MemoryStore};
use http::{spawn_metrics_task, start_server, ServerState};
use store::BlobStore;

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run the HTTP server (default)
    Server,
    /// List durable records
    List,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"Blobstream Daemon - streaming blob store over HTTP

USAGE:
    blobstream                  # Run HTTP server (default)
    blobstream serve
    blobstream list
    blobstream help

COMMANDS:
    (none)  Run the HTTP server
    serve   Same as above
    list    List blobs stored in DATA_DIR
    help    Show this help message

ENVIRONMENT:
    LISTEN_ADDR            Bind address (default 0.0.0.0:8080)
    DATA_DIR               Durable storage root (default <data dir>/blobstream)
    PERSISTENCE            on | memory | off (default on, which uses DATA_DIR)
    CACHE_MAX_BYTES        Memory cache bound in bytes, 0 = unbounded (default 1 GiB)
    METADATA_TTL_SECS      Probe metadata cache TTL (default 300)
    METRICS_INTERVAL_SECS  Cache metrics log interval, 0 = off (default 60)
    RUST_LOG               Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "serve" => Ok(Command::Server),
        "list" => Ok(Command::List),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(anyhow!("Unknown command: {}", other)),
    }
}

fn build_bridge(config: &Config) -> Result<DurabilityBridge> {
    match config.persistence {
        Persistence::Off => Ok(DurabilityBridge::disabled()),
        Persistence::Memory => Ok(DurabilityBridge::new(Arc::new(MemoryStore::new()))),
        Persistence::Disk => {
            let disk = DiskStore::new(config.data_dir.clone()).with_context(|| {
                format!(
                    "Failed to open data directory {}",
                    config.data_dir.display()
                )
            })?;
            Ok(DurabilityBridge::new(Arc::new(disk)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = Config::from_env()?;
    let bridge = build_bridge(&config)?;

    match command {
        Command::Server => {
            info!(
                addr = %config.listen_addr,
                backend = bridge.backend_name(),
                data_dir = %config.data_dir.display(),
                "Starting blobstream daemon"
            );

            let store = BlobStore::new(
                BlobCache::new(config.cache_max_bytes, bridge.is_enabled()),
                MetadataCache::with_ttl(config.metadata_ttl),
                bridge,
            );
            let state = Arc::new(ServerState::new(store));

            let metrics = config
                .metrics_interval
                .map(|interval| spawn_metrics_task(Arc::clone(&state), interval));

            if let Err(e) = start_server(Arc::clone(&state), config.listen_addr).await {
                error!(error = %e, "HTTP server error");
                return Err(e.into());
            }

            if let Some(handle) = metrics {
                handle.abort();
            }
            state.store.log_metrics();
            info!("Shutdown complete.");
        }
        Command::List => {
            if config.persistence != Persistence::Disk {
                println!("Persistence is not on disk; a new process has nothing stored.");
                return Ok(());
            }
            let records = bridge.list().await?;
            if records.is_empty() {
                println!("No blobs stored in {}.", config.data_dir.display());
            } else {
                println!("Stored blobs:");
                for meta in records {
                    println!(
                        "  {} ({} bytes, {})",
                        meta.key, meta.size, meta.content_type
                    );
                }
            }
        }
        Command::Help => {}
    }

    Ok(())
}
