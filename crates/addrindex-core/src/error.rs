//! Error types for the addrindex pipeline.

use thiserror::Error;

use crate::types::{AddressId, TxId};

/// Errors that can occur during indexing or querying.
///
/// A missing ancestor block is not an error: it is reported through
/// [`IngestOutcome::BlockRequired`](crate::coordinator::IngestOutcome).
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Blob store error: {0}")]
    BlobStore(#[from] std::io::Error),

    /// Replaying the persisted address table produced a different id.
    #[error("Address was inconsistently encoded: expected id {expected}, got {actual}")]
    InconsistentAddressEncoding {
        expected: AddressId,
        actual: AddressId,
        /// The last id that replayed correctly, if any.
        last_good: Option<AddressId>,
    },

    /// A chain tracker invariant was violated by its caller.
    #[error("Chain tracker misuse: {0}")]
    ChainMisuse(String),

    #[error("Persisted chain has {leaves} heads and no declared head to pick from")]
    AmbiguousHead { leaves: usize },

    #[error("Invalid persisted chain: {0}")]
    InvalidChain(String),

    #[error("No order key for transaction {tx_id}")]
    MissingOrderKey { tx_id: TxId },

    #[error("Unknown address id {0}")]
    UnknownAddressId(AddressId),

    /// In-memory state may not match the store; queries are refused until a
    /// reload succeeds.
    #[error("Index state is out of sync with the store, reload pending")]
    StaleState,

    #[error("Index was opened read-only")]
    ReadOnly,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for transient I/O that the fetch boundary may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the error reports corrupted persisted state.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InconsistentAddressEncoding { .. } | Self::InvalidChain(_)
        )
    }

    pub(crate) fn misuse(msg: impl Into<String>) -> Self {
        Self::ChainMisuse(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rpc_errors_are_retryable() {
        assert!(IndexerError::Rpc("connection reset".into()).is_retryable());
        assert!(!IndexerError::Storage("disk full".into()).is_retryable());
        assert!(!IndexerError::RetriesExhausted {
            attempts: 5,
            reason: "timeout".into()
        }
        .is_retryable());
    }

    #[test]
    fn encoding_mismatch_is_corruption() {
        let err = IndexerError::InconsistentAddressEncoding {
            expected: 7,
            actual: 3,
            last_good: Some(6),
        };
        assert!(err.is_corruption());
        assert!(err.to_string().contains("expected id 7"));
    }
}
