//! Cluster server configuration.
//!
//! Loaded once at startup and treated as immutable process-wide state. The
//! peer address book lists every cluster server, the local one included;
//! fan-out skips the entry matching `grpc_addr`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Immutable configuration for one cluster server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Local node id within the cluster consensus group.
    pub node_id: u64,
    /// Address this server's RPC endpoint is reachable at.
    pub grpc_addr: String,
    /// Address book of every cluster server, the local one included.
    pub peers: Vec<String>,
    /// Directory handed to the namespace keeper for per-volume group WALs.
    pub wal_dir: PathBuf,
    /// Interval between datanode health sweeps.
    #[serde(default = "default_health_tick_ms")]
    pub health_tick_ms: u64,
    /// Deadline for one health probe RPC.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Deadline for one cross-node replica copy during migration.
    #[serde(default = "default_copy_timeout_ms")]
    pub copy_timeout_ms: u64,
    /// Upper bound on block groups materialized by one create or expand
    /// call. The quota of a create request is clamped to
    /// `max_block_groups_per_request * BLK_SIZE_GIB`.
    #[serde(default = "default_max_block_groups")]
    pub max_block_groups_per_request: i32,
}

fn default_health_tick_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_copy_timeout_ms() -> u64 {
    300_000
}

fn default_max_block_groups() -> i32 {
    6
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            grpc_addr: "127.0.0.1:9901".to_string(),
            peers: vec!["127.0.0.1:9901".to_string()],
            wal_dir: PathBuf::from("/var/lib/blockfs/wal"),
            health_tick_ms: default_health_tick_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            copy_timeout_ms: default_copy_timeout_ms(),
            max_block_groups_per_request: default_max_block_groups(),
        }
    }
}

impl ClusterConfig {
    /// Parse a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn health_tick(&self) -> Duration {
        Duration::from_millis(self.health_tick_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_millis(self.copy_timeout_ms)
    }
}
