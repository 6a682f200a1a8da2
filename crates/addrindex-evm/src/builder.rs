//! Fluent builder API for indexer configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use addrindex_core::Network;
//! use addrindex_evm::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .network(Network::Rsk)
//!     .db_path("rsk.db")
//!     .confirmation_depth(6)
//!     .token("RIF", "0x2acc95758f8b5f583470ba265eb685a8f45fc9d5")
//!     .build_config()
//!     .unwrap();
//! ```

use std::path::PathBuf;

use addrindex_core::{AddressBackend, IndexConfig, IndexerError, Network, RetrySettings, TokenConfig};

/// Fluent builder for [`IndexConfig`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one read from a file.
    pub fn from_config(config: IndexConfig) -> Self {
        Self { config }
    }

    pub fn network(mut self, network: Network) -> Self {
        self.config.network = network;
        self
    }

    /// Node endpoint. Defaults to localhost on the network's RPC port.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = Some(url.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = path.into();
        self
    }

    /// Record call data and receipt logs in the two blob files.
    pub fn binary_buffers(mut self, inputs: impl Into<PathBuf>, logs: impl Into<PathBuf>) -> Self {
        self.config.record_binary_buffers = true;
        self.config.inputs_path = Some(inputs.into());
        self.config.logs_path = Some(logs.into());
        self
    }

    pub fn address_backend(mut self, backend: AddressBackend) -> Self {
        self.config.address_backend = backend;
        self
    }

    /// Register an ERC-20 token whose transfers are annotated.
    pub fn token(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.config.tokens.push(TokenConfig {
            name: name.into(),
            address: address.into(),
        });
        self
    }

    /// Blocks left behind the node's head during initial sync.
    pub fn initial_sync_lag(mut self, blocks: u64) -> Self {
        self.config.initial_sync_lag = blocks;
        self
    }

    /// Blocks left behind the node's head in live mode.
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn batch_max_transactions(mut self, n: usize) -> Self {
        self.config.batch_max_transactions = n;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn fee_window(mut self, blocks: u64) -> Self {
        self.config.fee_window = blocks;
        self
    }

    pub fn max_gap_fill_depth(mut self, depth: usize) -> Self {
        self.config.max_gap_fill_depth = depth;
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    /// Validate and return the configuration.
    pub fn build_config(self) -> Result<IndexConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
