//! addrindex-evm: node-facing half of the indexer.
//!
//! Fetches blocks and receipts over JSON-RPC, decodes them into
//! [`IngestBlock`](addrindex_core::IngestBlock)s and drives an
//! [`IndexCoordinator`](addrindex_core::IndexCoordinator) through initial
//! sync and live polling.

pub mod builder;
pub mod fetcher;
pub mod http;
pub mod index_loop;
pub mod retry;

#[cfg(test)]
mod mock;

pub use builder::IndexerBuilder;
pub use fetcher::{block_from_json, parse_quantity, receipt_from_json, BlockFetcher, EvmRpcClient};
pub use http::HttpRpcClient;
pub use index_loop::{IndexLoop, LoopState};
pub use retry::RetryPolicy;
