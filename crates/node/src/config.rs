//! Node configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stakechain_ledger::ValidatorSet;
use stakechain_store::DEFAULT_CHUNK_SIZE_LIMIT;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration, loaded from TOML. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity compared against validator sets
    pub peer_id: String,
    /// Advertised address of this peer
    pub ip: String,
    /// Data-layer bind address
    pub data_addr: String,
    /// Network (block proposal) bind address
    pub network_addr: String,
    /// Consensus (submission) bind address
    pub consensus_addr: String,
    /// Chunk file directory
    pub chain_dir: PathBuf,
    pub chunk_size_limit: usize,
    /// Validators for the first block of an empty chain
    pub genesis_validators: ValidatorSet,
    /// Static peer directory, used when `directory_addr` is unset
    pub peers: ValidatorSet,
    pub directory_addr: Option<String>,
    pub shard_size: usize,
    pub max_outbound: usize,
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_inflight_messages: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: "local".to_string(),
            ip: "127.0.0.1".to_string(),
            data_addr: "127.0.0.1:7100".to_string(),
            network_addr: "127.0.0.1:7200".to_string(),
            consensus_addr: "127.0.0.1:7300".to_string(),
            chain_dir: PathBuf::from("./chain"),
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
            genesis_validators: ValidatorSet::new(),
            peers: ValidatorSet::new(),
            directory_addr: None,
            shard_size: 50,
            max_outbound: 64,
            idle_timeout_secs: 30,
            request_timeout_secs: 5,
            max_inflight_messages: 1024,
        }
    }
}

impl NodeConfig {
    /// Load config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: NodeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.peer_id.is_empty(), "peer_id must not be empty");
        anyhow::ensure!(self.shard_size > 0, "shard_size must be positive");
        anyhow::ensure!(self.max_outbound > 0, "max_outbound must be positive");
        anyhow::ensure!(
            self.max_inflight_messages > 0,
            "max_inflight_messages must be positive"
        );
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
