//! Shared types for the indexing pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Dense integer bound to exactly one address string.
pub type AddressId = u64;
/// Row identifier of a block in the relational store.
pub type StorageId = u64;
/// Row identifier of a transaction in the relational store.
pub type TxId = u64;

// ─── Hash256 ─────────────────────────────────────────────────────────────────

/// Error returned when a hex string is not a valid 32-byte hash.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A fixed-length 32-byte hash (block or transaction hash).
///
/// Hex parsing accepts an optional `0x` prefix and either letter case, so two
/// spellings of the same hash compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256([u8; 32]);

/// Block hash.
pub type BlockHash = Hash256;
/// Transaction hash.
pub type TxHash = Hash256;

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a hex string (`0x`-prefixed or bare, any case).
    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s)?;
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashParseError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Lower-case `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Hash256 {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Chain types ─────────────────────────────────────────────────────────────

/// A block in the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
    /// Zero-based position in the canonical chain.
    pub height: u64,
    pub storage_id: StorageId,
    /// `None` for the root of the chain.
    pub previous_storage_id: Option<StorageId>,
}

/// A block that has to be reverted before a new block can attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertBlock {
    pub hash: BlockHash,
    pub storage_id: StorageId,
    pub height: u64,
}

/// Result of probing where a candidate block would attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainReorganization {
    /// The parent is unknown: fetch and apply this block first.
    BlockRequired(BlockHash),
    /// The block attaches at `height` once `revert` (tip first) is undone.
    Attach {
        height: u64,
        revert: Vec<RevertBlock>,
    },
}

impl ChainReorganization {
    pub fn block_required(&self) -> Option<&BlockHash> {
        match self {
            Self::BlockRequired(hash) => Some(hash),
            Self::Attach { .. } => None,
        }
    }

    /// Blocks to revert, ordered from the tip down to one past the fork point.
    pub fn blocks_to_revert(&self) -> &[RevertBlock] {
        match self {
            Self::BlockRequired(_) => &[],
            Self::Attach { revert, .. } => revert,
        }
    }

    pub fn attach_height(&self) -> Option<u64> {
        match self {
            Self::BlockRequired(_) => None,
            Self::Attach { height, .. } => Some(*height),
        }
    }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

/// Chronological sort key of a transaction: `(block timestamp, index in block)`.
///
/// Field order matters: the derived `Ord` is lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub timestamp: i64,
    pub index: u32,
}

/// The transaction id range `[tx_begin, tx_end)` owned by one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampItem {
    pub tx_begin: TxId,
    pub tx_end: TxId,
    pub timestamp: i64,
}

impl TimestampItem {
    pub fn contains(&self, tx_id: TxId) -> bool {
        self.tx_begin <= tx_id && tx_id < self.tx_end
    }
}

// ─── Blobs ───────────────────────────────────────────────────────────────────

/// Location of a payload in an append-only blob file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHandle {
    pub offset: u64,
    /// `0` marks "no payload"; the offset is still meaningful.
    pub size: u64,
}

// ─── Ingestion input ─────────────────────────────────────────────────────────

/// A block as delivered by the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestBlock {
    /// Block number as reported by the node.
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    pub miner: String,
    pub transactions: Vec<IngestTransaction>,
}

/// A transaction plus its receipt, if one was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestTransaction {
    pub hash: TxHash,
    pub from: Option<String>,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Decimal amount in the chain's base unit.
    pub value: String,
    pub gas_price: String,
    pub gas_limit: String,
    /// Raw call data.
    pub input: Vec<u8>,
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub contract_address: Option<String>,
    pub gas_used: String,
    /// `None` on chains or eras without a status field.
    pub status: Option<bool>,
    /// The receipt's `logs` array, kept as JSON.
    pub logs: serde_json::Value,
}

impl Receipt {
    pub fn has_logs(&self) -> bool {
        self.logs.as_array().is_some_and(|logs| !logs.is_empty())
    }
}

// ─── Query output ────────────────────────────────────────────────────────────

/// A fully materialized history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub sender: String,
    pub receiver: String,
    pub value: String,
    pub timestamp: i64,
    pub block_hash: BlockHash,
    /// Height as exposed to clients (network offset applied).
    pub block_height: u64,
    #[serde(skip)]
    pub order: Option<OrderKey>,
}
