//! Node configuration, loaded from YAML or JSON files.

use alloy_primitives::Address;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Loadable/savable config object. Files ending in `.json` use JSON,
/// everything else is treated as YAML.
pub trait Config
where
    Self: DeserializeOwned + Serialize,
{
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path)
            .with_context(|| format!("unable to load config from {}", path.display()))?;
        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_reader(reader)?)
        } else {
            Ok(serde_yaml::from_reader(reader)?)
        }
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let path = path.as_ref();
        let writer = std::fs::File::create(path)
            .with_context(|| format!("unable to open config file {}", path.display()))?;
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            serde_yaml::to_writer(writer, self)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NativeChainConfig {
    pub rpc_url: String,
    /// Asset manager contract whose events the replica tracks.
    pub asset_manager_address: Address,
    /// First block to scan when no watermark exists yet.
    #[serde(default)]
    pub start_block: u64,
    /// Max blocks per `past_events` query.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct UnderlyingChainConfig {
    pub indexer_url: String,
    /// Blocks withheld from the scan tip so only finalized transactions are
    /// examined.
    #[serde(default = "default_finality_blocks")]
    pub finality_blocks: u64,
    /// First underlying block to scan when no watermark exists yet; zero
    /// means start at the current tip.
    #[serde(default)]
    pub scan_from_block: u64,
}

/// Which actors this node runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ActorSetConfig {
    #[serde(default = "default_true")]
    pub challenger: bool,
    #[serde(default = "default_true")]
    pub liquidator: bool,
    #[serde(default = "default_true")]
    pub system_keeper: bool,
}

impl Default for ActorSetConfig {
    fn default() -> Self {
        Self {
            challenger: true,
            liquidator: true,
            system_keeper: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherNodeConfig {
    pub native_chain: NativeChainConfig,
    pub underlying_chain: UnderlyingChainConfig,
    pub attestation_url: String,
    #[serde(default)]
    pub actors: ActorSetConfig,
    /// Actor poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Most expensive transactions reported per negative-balance challenge.
    #[serde(default = "default_max_reported_transactions")]
    pub max_reported_transactions: usize,
}

impl Config for WatcherNodeConfig {}

impl WatcherNodeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Runtime knobs for the challenger, derived from the node config.
#[derive(Debug, Clone)]
pub struct ChallengerConfig {
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub underlying_finality_blocks: u64,
    /// Zero means start scanning at the current tip.
    pub scan_from_block: u64,
    pub max_reported_transactions: usize,
    /// Per-agent challenge lock: retry this many times at this interval,
    /// then give up the check.
    pub max_lock_retries: u32,
    pub lock_retry_interval: Duration,
}

impl Default for ChallengerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            max_block_range: default_max_block_range(),
            underlying_finality_blocks: default_finality_blocks(),
            scan_from_block: 0,
            max_reported_transactions: default_max_reported_transactions(),
            max_lock_retries: 100,
            lock_retry_interval: Duration::from_millis(100),
        }
    }
}

impl ChallengerConfig {
    pub fn from_node_config(config: &WatcherNodeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_block_range: config.native_chain.max_block_range,
            underlying_finality_blocks: config.underlying_chain.finality_blocks,
            scan_from_block: config.underlying_chain.scan_from_block,
            max_reported_transactions: config.max_reported_transactions,
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_finality_blocks() -> u64 {
    6
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_max_reported_transactions() -> usize {
    50
}
