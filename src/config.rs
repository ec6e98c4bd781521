//! Daemon configuration read from the environment

use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::blob_cache::DEFAULT_MAX_CACHE_SIZE;
use crate::cache::metadata::DEFAULT_METADATA_TTL;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

/// Where completed blobs are kept beyond the memory cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Records under `data_dir`
    Disk,
    /// Records in a process-local map
    Memory,
    /// Cache only
    Off,
}

impl std::str::FromStr for Persistence {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" | "yes" | "disk" => Ok(Persistence::Disk),
            "memory" => Ok(Persistence::Memory),
            "off" | "false" | "0" | "no" => Ok(Persistence::Off),
            other => Err(anyhow!("expected on, memory or off, got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Root directory for durable records
    pub data_dir: PathBuf,
    pub persistence: Persistence,
    /// `None` means unbounded
    pub cache_max_bytes: Option<u64>,
    pub metadata_ttl: Duration,
    /// `None` disables periodic metrics logging
    pub metrics_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let listen_addr = var("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("Invalid LISTEN_ADDR")?;

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let persistence = match var("PERSISTENCE") {
            None => Persistence::Disk,
            Some(v) => v.parse::<Persistence>().context("Invalid PERSISTENCE")?,
        };

        let cache_max_bytes = match parse_u64(var("CACHE_MAX_BYTES"), "CACHE_MAX_BYTES")? {
            None => Some(DEFAULT_MAX_CACHE_SIZE),
            Some(0) => None,
            Some(n) => Some(n),
        };

        let metadata_ttl = parse_u64(var("METADATA_TTL_SECS"), "METADATA_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_METADATA_TTL);

        let metrics_interval =
            match parse_u64(var("METRICS_INTERVAL_SECS"), "METRICS_INTERVAL_SECS")?
                .unwrap_or(DEFAULT_METRICS_INTERVAL_SECS)
            {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };

        Ok(Self {
            listen_addr,
            data_dir,
            persistence,
            cache_max_bytes,
            metadata_ttl,
            metrics_interval,
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("blobstream")
}

fn parse_u64(value: Option<String>, name: &str) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.parse::<u64>()
                .with_context(|| format!("Invalid {}: {:?}", name, v))
        })
        .transpose()
}
