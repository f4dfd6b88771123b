//! Vault configuration: the supported-network registry, sync tuning knobs,
//! and environment loading.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::DEFAULT_TREE_DEPTH;

/// Validated deployment record for one supported chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: &'static str,
    pub indexer_url: &'static str,
}

static SUPPORTED_NETWORKS: Lazy<HashMap<u64, NetworkConfig>> = Lazy::new(|| {
    let mut networks = HashMap::new();
    for network in [
        NetworkConfig {
            chain_id: 1,
            name: "mainnet",
            indexer_url: "https://indexer.notevault.io/v1",
        },
        NetworkConfig {
            chain_id: 11155111,
            name: "sepolia",
            indexer_url: "https://indexer.sepolia.notevault.io/v1",
        },
        NetworkConfig {
            chain_id: 421614,
            name: "arbitrum-sepolia",
            indexer_url: "https://indexer.arb-sepolia.notevault.io/v1",
        },
    ] {
        networks.insert(network.chain_id, network);
    }
    networks
});

/// Looks up the config record for a chain, failing fast on unknown ids so
/// misconfiguration surfaces at startup rather than at first use.
pub fn network_for_chain(chain_id: u64) -> Result<NetworkConfig> {
    SUPPORTED_NETWORKS
        .get(&chain_id)
        .cloned()
        .ok_or_else(|| Error::InvalidConfig(format!("unsupported chain id {chain_id}")))
}

pub fn supported_chain_ids() -> Vec<u64> {
    let mut ids: Vec<u64> = SUPPORTED_NETWORKS.keys().copied().collect();
    ids.sort_unstable();
    ids
}

/// Tuning for the indexer polling task.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Events requested per page.
    pub page_size: u32,
    /// Delay between polling passes.
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Retries per page fetch before giving up.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            poll_interval: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl SyncOptions {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// Everything a vault instance needs, resolved and validated up front.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub network: NetworkConfig,
    /// Indexer base URL; defaults to the network's deployment, overridable.
    pub indexer_url: String,
    pub db_path: PathBuf,
    pub tree_depth: usize,
    pub sync: SyncOptions,
}

impl VaultConfig {
    pub fn new(chain_id: u64, db_path: impl Into<PathBuf>) -> Result<Self> {
        let network = network_for_chain(chain_id)?;
        Ok(VaultConfig {
            indexer_url: network.indexer_url.to_string(),
            network,
            db_path: db_path.into(),
            tree_depth: DEFAULT_TREE_DEPTH,
            sync: SyncOptions::default(),
        })
    }

    /// Loads configuration from the environment.
    ///
    /// Required: `NOTEVAULT_CHAIN_ID`, `NOTEVAULT_DB_PATH`.
    /// Optional: `NOTEVAULT_INDEXER_URL`, `NOTEVAULT_PAGE_SIZE`,
    /// `NOTEVAULT_POLL_INTERVAL_SECS`.
    pub fn from_env() -> Result<Self> {
        let chain_id: u64 = parse_env("NOTEVAULT_CHAIN_ID", &get_env("NOTEVAULT_CHAIN_ID")?)?;
        let db_path = get_env("NOTEVAULT_DB_PATH")?;
        let mut config = VaultConfig::new(chain_id, db_path)?;

        if let Ok(url) = env::var("NOTEVAULT_INDEXER_URL") {
            config.indexer_url = url;
        }
        if let Ok(value) = env::var("NOTEVAULT_PAGE_SIZE") {
            config.sync.page_size = parse_env("NOTEVAULT_PAGE_SIZE", &value)?;
        }
        if let Ok(value) = env::var("NOTEVAULT_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env("NOTEVAULT_POLL_INTERVAL_SECS", &value)?;
            config.sync.poll_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::InvalidConfig(format!("missing required env var {name}")))
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|err| Error::InvalidConfig(format!("invalid {name} value {value:?}: {err}")))
}
