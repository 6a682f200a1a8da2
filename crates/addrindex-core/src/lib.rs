//! addrindex-core: bookkeeping engine of the reorg-safe address indexer.
//!
//! # Architecture
//!
//! ```text
//! IngestBlock → IndexCoordinator
//!                   ├── ChainTracker     (canonical chain, fork probing)
//!                   ├── AddressCache     (address ↔ dense id, replay check)
//!                   ├── OrderIndex       (tx id → (timestamp, index))
//!                   ├── BinaryBlobStore  (append-only inputs / logs)
//!                   └── IndexStore       (memory / SQLite rows)
//! ```

pub mod address;
pub mod blob;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod order;
pub mod store;
pub mod token;
pub mod tracker;
pub mod types;

pub use address::{normalize, AddressCache, AddressEncoder, HashMapEncoder, PackedEncoder};
pub use blob::BinaryBlobStore;
pub use config::{AddressBackend, IndexConfig, Network, RetrySettings, TokenConfig};
pub use coordinator::{BatchOutcome, IndexCoordinator, IndexStatus, IngestOutcome, NO_ADDRESS};
pub use error::IndexerError;
pub use order::OrderIndex;
pub use store::{
    BlockRow, IndexStore, MemoryStore, StoreTransaction, TokenId, TokenRow, TokenTransactionRow,
    TransactionRow, TransactionView,
};
pub use token::{parse_transfer, transaction_succeeded, TokenFunction, TokenTransfer};
pub use tracker::{assemble_chain, ChainTracker, InMemoryChainTracker, StoredBlock};
pub use types::{
    AddressId, BlobHandle, Block, BlockHash, ChainReorganization, Hash256, HashParseError,
    IngestBlock, IngestTransaction, OrderKey, Receipt, RevertBlock, StorageId, TimestampItem,
    TransactionRecord, TxHash, TxId,
};
