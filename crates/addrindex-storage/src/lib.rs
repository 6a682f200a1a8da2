//! addrindex-storage: relational store backends for AddrIndex.
//!
//! Backends:
//! - [`MemoryStore`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use addrindex_core::store::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
