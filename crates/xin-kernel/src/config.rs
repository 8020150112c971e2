use std::path::Path;

use serde::Deserialize;
use xin_core::Error;

pub const HOUR_NS: u64 = 3_600_000_000_000;
pub const DAY_NS: u64 = 24 * HOUR_NS;

/// Nominal spacing of a round: all snapshots of one round fall within this
/// window of its first snapshot.
pub const SNAPSHOT_ROUND_GAP: u64 = 3_000_000_000;

/// How many recent final rounds a chain keeps referencable.
pub const SNAPSHOT_REFERENCE_THRESHOLD: u64 = 10;

/// How far behind its chain's tip an external reference may lag.
pub const SNAPSHOT_SYNC_ROUND_THRESHOLD: u64 = 100;

/// Hour-of-day window (relative to the epoch hour) in which reward mints
/// are accepted.
pub const KERNEL_MINT_TIME_BEGIN: u64 = 7;
pub const KERNEL_MINT_TIME_END: u64 = 9;

pub const KERNEL_NODE_ACCEPT_PERIOD_MINIMUM: u64 = 12 * HOUR_NS;
pub const KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM: u64 = 7 * DAY_NS;

/// A non-genesis node becomes removable this many days after acceptance.
pub const KERNEL_NODE_REMOVE_TERM_DAYS: u64 = 365;

/// Node removal only happens at this UTC wall-clock hour.
pub const KERNEL_NODE_REMOVE_HOUR_UTC: u32 = 17;

pub const MAINNET_ID: &str = "6430225c42bb015b4da03102fa962e4f4ef3969e03e04345db229f8377ef7997";

/// Before this batch, mainnet accepted mints in a wider hour window.
pub const MAINNET_MINT_PERIOD_FORK_BATCH: u64 = 72;
pub const MAINNET_MINT_PERIOD_FORK_TIME_BEGIN: u64 = 6;
pub const MAINNET_MINT_PERIOD_FORK_TIME_END: u64 = 18;

fn default_kernel_operation_period() -> u64 {
    700
}

fn default_memory_cache_size() -> usize {
    16
}

fn default_cache_ttl() -> u64 {
    7200
}

/// Runtime configuration, loaded from `config.toml` in the node directory.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Custom {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    /// Hex-encoded private spend key of this node's signer.
    #[serde(default)]
    pub signer_key: String,
    #[serde(default)]
    pub consensus_only: bool,
    /// Seconds between mint/election attempts.
    #[serde(default = "default_kernel_operation_period")]
    pub kernel_operation_period: u64,
    /// Signature-verification cache budget, in megabytes.
    #[serde(default = "default_memory_cache_size")]
    pub memory_cache_size: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signer_key: String::new(),
            consensus_only: false,
            kernel_operation_period: default_kernel_operation_period(),
            memory_cache_size: default_memory_cache_size(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    #[serde(default)]
    pub listener: String,
    #[serde(default)]
    pub gossip_neighbors: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcConfig {
    #[serde(default)]
    pub runtime: bool,
    #[serde(default)]
    pub listener: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    #[serde(default)]
    pub value_log_gc: bool,
}

impl Custom {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Store(e.to_string()))?;
        toml::from_str(&raw).map_err(|e| Error::Syntax(e.to_string()))
    }
}
