//! Indexer configuration.
//!
//! One [`IndexConfig`] value is built at startup (from a JSON file or the
//! builder) and handed to each component's constructor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Supported networks. Two families are observed: Ethereum-style and RSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Ethereum,
    Ropsten,
    Rsk,
    RskTestnet,
}

impl Network {
    pub fn is_ethereum(&self) -> bool {
        matches!(self, Self::Ethereum | Self::Ropsten)
    }

    /// Offset between the tracker's zero-based height and the height clients
    /// see. Applied at the query boundary only.
    pub fn height_offset(&self) -> u64 {
        if self.is_ethereum() {
            0
        } else {
            1
        }
    }

    pub fn default_rpc_port(&self) -> u16 {
        if self.is_ethereum() {
            8545
        } else {
            4444
        }
    }

    pub fn default_rpc_url(&self) -> String {
        format!("http://localhost:{}", self.default_rpc_port())
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ethereum => write!(f, "ethereum"),
            Self::Ropsten => write!(f, "ropsten"),
            Self::Rsk => write!(f, "rsk"),
            Self::RskTestnet => write!(f, "rsk_testnet"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" => Ok(Self::Ethereum),
            "ropsten" => Ok(Self::Ropsten),
            "rsk" => Ok(Self::Rsk),
            "rsk_testnet" | "rsk-testnet" => Ok(Self::RskTestnet),
            other => Err(IndexerError::Config(format!("unknown network '{other}'"))),
        }
    }
}

/// Which address cache implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressBackend {
    #[default]
    HashMap,
    Packed,
}

/// An ERC-20 contract whose transfers are annotated during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub name: String,
    pub address: String,
}

/// Backoff settings for the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            multiplier: 2.0,
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub network: Network,
    /// Node JSON-RPC endpoint. Derived from the network when absent.
    pub rpc_url: Option<String>,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Store raw call data and receipt logs in blob files.
    pub record_binary_buffers: bool,
    pub inputs_path: Option<PathBuf>,
    pub logs_path: Option<PathBuf>,
    pub address_backend: AddressBackend,
    pub tokens: Vec<TokenConfig>,
    /// Initial sync stops this many blocks below the node's head.
    pub initial_sync_lag: u64,
    /// Live mode stays this many blocks below the node's head.
    pub confirmation_depth: u64,
    /// Initial sync commits a batch once it holds this many transactions.
    pub batch_max_transactions: usize,
    /// Block polling interval in live mode (milliseconds).
    pub poll_interval_ms: u64,
    /// Number of canonical blocks averaged by the fee estimate.
    pub fee_window: u64,
    /// How many missing ancestors may be fetched for a single block.
    pub max_gap_fill_depth: usize,
    pub retry: RetrySettings,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            network: Network::Ethereum,
            rpc_url: None,
            db_path: PathBuf::from("addrindex.db"),
            record_binary_buffers: false,
            inputs_path: None,
            logs_path: None,
            address_backend: AddressBackend::HashMap,
            tokens: Vec::new(),
            initial_sync_lag: 100,
            confirmation_depth: 0,
            batch_max_transactions: 50_000,
            poll_interval_ms: 1_000,
            fee_window: 60,
            max_gap_fill_depth: 1024,
            retry: RetrySettings::default(),
        }
    }
}

impl IndexConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            IndexerError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.record_binary_buffers && (self.inputs_path.is_none() || self.logs_path.is_none())
        {
            return Err(IndexerError::Config(
                "record_binary_buffers requires inputs_path and logs_path".into(),
            ));
        }
        if self.batch_max_transactions == 0 {
            return Err(IndexerError::Config(
                "batch_max_transactions must be greater than zero".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(IndexerError::Config(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for token in &self.tokens {
            if !names.insert(token.name.as_str()) {
                return Err(IndexerError::Config(format!(
                    "token '{}' is configured twice",
                    token.name
                )));
            }
        }
        Ok(())
    }

    pub fn rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .unwrap_or_else(|| self.network.default_rpc_url())
    }
}
