use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the execution and recovery core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub mempool: MempoolSection,
    #[serde(default)]
    pub wal: WalSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MempoolSection {
    /// Max pool entries.
    #[serde(default = "default_mempool_size")]
    pub size: usize,
    /// Max cumulative raw tx bytes held by the pool.
    #[serde(default = "default_max_txs_bytes")]
    pub max_txs_bytes: i64,
    /// Dedup cache capacity.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Largest single tx the pool accepts.
    #[serde(default = "default_max_tx_size")]
    pub max_tx_size: usize,
    /// Enables the mempool WAL when non-empty.
    #[serde(default)]
    pub wal_dir: String,
    /// Re-check residual txs after every commit.
    #[serde(default = "default_true")]
    pub recheck: bool,
    /// Gossip admitted txs to peers.
    #[serde(default = "default_true")]
    pub broadcast: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalSection {
    #[serde(default = "default_wal_dir")]
    pub dir: String,
    /// Head file rolls over past this size.
    #[serde(default = "default_wal_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub module_levels: Option<String>,
}

// Default value functions
fn default_chain_id() -> String { "localnet".to_string() }
fn default_data_dir() -> String { "data".to_string() }
fn default_mempool_size() -> usize { 5000 }
fn default_max_txs_bytes() -> i64 { 1024 * 1024 * 1024 }
fn default_cache_size() -> usize { 10_000 }
fn default_max_tx_size() -> usize { 1024 * 1024 }
fn default_true() -> bool { true }
fn default_wal_dir() -> String { "data/cs_wal".to_string() }
fn default_wal_max_file_size() -> u64 { 10 * 1024 * 1024 }
fn default_log_format() -> String { "json".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for NodeSection {
    fn default() -> Self {
        Self { chain_id: default_chain_id(), data_dir: default_data_dir() }
    }
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self {
            size: default_mempool_size(),
            max_txs_bytes: default_max_txs_bytes(),
            cache_size: default_cache_size(),
            max_tx_size: default_max_tx_size(),
            wal_dir: String::new(),
            recheck: true,
            broadcast: true,
        }
    }
}

impl Default for WalSection {
    fn default() -> Self {
        Self { dir: default_wal_dir(), max_file_size: default_wal_max_file_size() }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
            module_levels: None,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            mempool: MempoolSection::default(),
            wal: WalSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(_) => Self::default(),
        }
    }

    /// Serialize to TOML (useful for generating template configs).
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Initialize structured logging from the logging section. Safe to call
/// more than once; later calls are ignored.
pub fn init_logging(cfg: &LoggingSection) {
    use tracing_subscriber::EnvFilter;

    let env_filter = if let Some(ref module_levels) = cfg.module_levels {
        EnvFilter::try_new(module_levels).unwrap_or_else(|_| EnvFilter::new(&cfg.level))
    } else {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(&cfg.level))
    };

    if cfg.format == "json" {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init();
    }
}
