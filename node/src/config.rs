use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chainlib::{CANDIDATE_POOL_CAPACITY, GENESIS_FILE, MINE_TICK, PEERS_FILE, SYNC_TICK};
use serde::{Deserialize, Serialize};

/// Runtime settings of a node. Every field has a default, so a config file only needs the ones
/// it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// `host:port` to listen on. Also how the node names itself to peers.
    pub address: String,
    /// newline separated peer list, re-read on every tick
    pub peers_file: PathBuf,
    pub genesis_file: PathBuf,
    pub mine_interval_ms: u64,
    pub sync_interval_ms: u64,
    /// deadline for one outbound request/reply, and idle limit for inbound connections
    pub rpc_timeout_ms: u64,
    pub candidate_pool_capacity: usize,
    /// append our own address to the peer list at start-up
    pub register_self: bool,
    /// also write daily rolling logs here
    pub log_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            address: "127.0.0.1:9000".to_string(),
            peers_file: PathBuf::from(PEERS_FILE),
            genesis_file: PathBuf::from(GENESIS_FILE),
            mine_interval_ms: MINE_TICK.as_millis() as u64,
            sync_interval_ms: SYNC_TICK.as_millis() as u64,
            rpc_timeout_ms: 2_000,
            candidate_pool_capacity: CANDIDATE_POOL_CAPACITY,
            register_self: true,
            log_dir: None,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn mine_interval(&self) -> Duration {
        Duration::from_millis(self.mine_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
