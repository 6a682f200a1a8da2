//! Relational store abstraction.
//!
//! The coordinator owns the rows; it reads and writes them only through
//! [`IndexStore`] and [`StoreTransaction`]. Two backends exist:
//! [`MemoryStore`] here (tests, ephemeral runs) and the SQLite store in
//! `addrindex-storage`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::tracker::StoredBlock;
use crate::types::{AddressId, BlobHandle, BlockHash, StorageId, TimestampItem, TxHash, TxId};

/// Row identifier of a registered token contract.
pub type TokenId = u64;

// ─── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
    pub storage_id: StorageId,
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
    pub miner: AddressId,
    pub timestamp: i64,
    pub first_transaction_id: TxId,
    pub transaction_count: u32,
    /// Integer mean gas price of the block's transactions; `None` when empty.
    pub average_gas_price: Option<String>,
}

impl BlockRow {
    pub fn timestamp_item(&self) -> TimestampItem {
        TimestampItem {
            tx_begin: self.first_transaction_id,
            tx_end: self.first_transaction_id + u64::from(self.transaction_count),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: TxId,
    pub hash: TxHash,
    pub sender: AddressId,
    pub receiver: AddressId,
    pub amount: String,
    pub block_id: StorageId,
    pub gas_price: String,
    pub gas_limit: String,
    pub contract_address: Option<AddressId>,
    pub gas_used: Option<String>,
    pub input: Option<BlobHandle>,
    pub logs: Option<BlobHandle>,
}

impl TransactionRow {
    /// Whether any address column references an id above `id`.
    fn references_above(&self, id: AddressId) -> bool {
        self.sender > id || self.receiver > id || self.contract_address.is_some_and(|c| c > id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransactionRow {
    pub tx_id: TxId,
    pub token_id: TokenId,
    /// `transfer` or `transferFrom`.
    pub function: String,
    pub sender: AddressId,
    pub receiver: AddressId,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRow {
    pub id: TokenId,
    pub name: String,
    pub address: AddressId,
}

/// A transaction row joined with its containing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionView {
    pub row: TransactionRow,
    pub block_hash: BlockHash,
    pub timestamp: i64,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Read side of the relational store plus transaction creation.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Start a write transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError>;

    /// Every `(id, address)` pair in ascending id order.
    async fn load_addresses(&self) -> Result<Vec<(AddressId, String)>, IndexerError>;

    async fn load_blocks(&self) -> Result<Vec<StoredBlock>, IndexerError>;

    async fn declared_head(&self) -> Result<Option<BlockHash>, IndexerError>;

    /// Id ranges of blocks with at least one transaction, sorted by `tx_begin`.
    async fn load_timestamp_items(&self) -> Result<Vec<TimestampItem>, IndexerError>;

    async fn max_transaction_id(&self) -> Result<Option<TxId>, IndexerError>;

    async fn max_block_id(&self) -> Result<Option<StorageId>, IndexerError>;

    async fn block_row(&self, storage_id: StorageId) -> Result<Option<BlockRow>, IndexerError>;

    /// Ids of transactions that name `address` as sender or receiver.
    async fn transaction_ids_for_address(
        &self,
        address: AddressId,
    ) -> Result<Vec<TxId>, IndexerError>;

    async fn transaction_view(&self, tx_id: TxId)
        -> Result<Option<TransactionView>, IndexerError>;

    async fn token_transaction_ids_for_address(
        &self,
        token_id: TokenId,
        address: AddressId,
    ) -> Result<Vec<TxId>, IndexerError>;

    async fn token_transaction(
        &self,
        tx_id: TxId,
    ) -> Result<Option<TokenTransactionRow>, IndexerError>;

    async fn load_tokens(&self) -> Result<Vec<TokenRow>, IndexerError>;

    /// Delete everything that depends on address ids above `last_good`.
    ///
    /// Removes the earliest block referencing such an id and every later
    /// block, their transactions and token transactions, the offending
    /// address rows and tokens, and clears the declared head. Returns `false`
    /// when nothing was deleted.
    async fn rollback_to_address(&self, last_good: AddressId) -> Result<bool, IndexerError>;

    async fn average_gas_price(
        &self,
        storage_id: StorageId,
    ) -> Result<Option<String>, IndexerError> {
        Ok(self
            .block_row(storage_id)
            .await?
            .and_then(|b| b.average_gas_price))
    }
}

/// An open write transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_address(&mut self, id: AddressId, address: &str) -> Result<(), IndexerError>;

    async fn insert_block(&mut self, row: &BlockRow) -> Result<(), IndexerError>;

    async fn insert_transaction(&mut self, row: &TransactionRow) -> Result<(), IndexerError>;

    async fn insert_token_transaction(
        &mut self,
        row: &TokenTransactionRow,
    ) -> Result<(), IndexerError>;

    /// Remove a block with its transactions and token transactions.
    async fn delete_block(&mut self, storage_id: StorageId) -> Result<(), IndexerError>;

    async fn set_declared_head(&mut self, head: Option<&BlockHash>) -> Result<(), IndexerError>;

    /// Register a token, returning its id. Re-registering updates the address.
    async fn upsert_token(&mut self, name: &str, address: AddressId)
        -> Result<TokenId, IndexerError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexerError>;
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryTables {
    addresses: BTreeMap<AddressId, String>,
    blocks: BTreeMap<StorageId, BlockRow>,
    /// Unique index on `blocks.hash`.
    block_hashes: BTreeMap<BlockHash, StorageId>,
    txs: BTreeMap<TxId, TransactionRow>,
    token_txs: BTreeMap<TxId, TokenTransactionRow>,
    tokens: BTreeMap<TokenId, TokenRow>,
    declared_head: Option<BlockHash>,
}

impl MemoryTables {
    fn rollback_to_address(&mut self, last_good: AddressId) -> bool {
        let mut first_bad_tx: Option<TxId> = self
            .txs
            .values()
            .filter(|t| t.references_above(last_good))
            .map(|t| t.id)
            .min();
        let token_bad = self
            .token_txs
            .values()
            .filter(|t| t.sender > last_good || t.receiver > last_good)
            .map(|t| t.tx_id)
            .min();
        first_bad_tx = match (first_bad_tx, token_bad) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let from_tx_block = first_bad_tx
            .and_then(|id| self.txs.get(&id))
            .map(|t| t.block_id);
        let from_miner = self
            .blocks
            .values()
            .filter(|b| b.miner > last_good)
            .map(|b| b.storage_id)
            .min();
        let first_bad_block = match (from_tx_block, from_miner) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut deleted = false;
        if let Some(block_id) = first_bad_block {
            let first_tx = self
                .blocks
                .get(&block_id)
                .map(|b| b.first_transaction_id)
                .unwrap_or(0);
            let before = self.blocks.len() + self.txs.len() + self.token_txs.len();
            self.blocks.retain(|&id, _| id < block_id);
            self.block_hashes.retain(|_, &mut id| id < block_id);
            self.txs.retain(|&id, _| id < first_tx);
            self.token_txs.retain(|&id, _| id < first_tx);
            deleted |= before != self.blocks.len() + self.txs.len() + self.token_txs.len();
        }

        let before = self.addresses.len() + self.tokens.len();
        self.addresses.retain(|&id, _| id <= last_good);
        self.tokens.retain(|_, t| t.address <= last_good);
        deleted |= before != self.addresses.len() + self.tokens.len();

        if deleted {
            self.declared_head = None;
        }
        deleted
    }
}

/// In-memory relational store for tests and development.
///
/// A transaction records only the rows it writes and removes, and merges
/// them into the tables on commit, so a dropped transaction leaves no trace.
/// Writes see the committed tables as of each call; there is no snapshot
/// isolation between concurrent writers. All data is lost when the process
/// exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        lock(&self.tables)
    }

    pub fn block_count(&self) -> usize {
        self.tables().blocks.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.tables().txs.len()
    }

    pub fn address_count(&self) -> usize {
        self.tables().addresses.len()
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.tables),
            addresses: Staged::default(),
            blocks: Staged::default(),
            block_hashes: Staged::default(),
            txs: Staged::default(),
            token_txs: Staged::default(),
            tokens: Staged::default(),
            declared_head: None,
        }))
    }

    async fn load_addresses(&self) -> Result<Vec<(AddressId, String)>, IndexerError> {
        Ok(self
            .tables()
            .addresses
            .iter()
            .map(|(id, a)| (*id, a.clone()))
            .collect())
    }

    async fn load_blocks(&self) -> Result<Vec<StoredBlock>, IndexerError> {
        Ok(self
            .tables()
            .blocks
            .values()
            .map(|b| StoredBlock {
                storage_id: b.storage_id,
                hash: b.hash,
                previous_hash: b.previous_hash,
            })
            .collect())
    }

    async fn declared_head(&self) -> Result<Option<BlockHash>, IndexerError> {
        Ok(self.tables().declared_head)
    }

    async fn load_timestamp_items(&self) -> Result<Vec<TimestampItem>, IndexerError> {
        let mut items: Vec<TimestampItem> = self
            .tables()
            .blocks
            .values()
            .filter(|b| b.transaction_count != 0)
            .map(BlockRow::timestamp_item)
            .collect();
        items.sort_by_key(|i| i.tx_begin);
        Ok(items)
    }

    async fn max_transaction_id(&self) -> Result<Option<TxId>, IndexerError> {
        Ok(self.tables().txs.keys().next_back().copied())
    }

    async fn max_block_id(&self) -> Result<Option<StorageId>, IndexerError> {
        Ok(self.tables().blocks.keys().next_back().copied())
    }

    async fn block_row(&self, storage_id: StorageId) -> Result<Option<BlockRow>, IndexerError> {
        Ok(self.tables().blocks.get(&storage_id).cloned())
    }

    async fn transaction_ids_for_address(
        &self,
        address: AddressId,
    ) -> Result<Vec<TxId>, IndexerError> {
        Ok(self
            .tables()
            .txs
            .values()
            .filter(|t| t.sender == address || t.receiver == address)
            .map(|t| t.id)
            .collect())
    }

    async fn transaction_view(
        &self,
        tx_id: TxId,
    ) -> Result<Option<TransactionView>, IndexerError> {
        let tables = self.tables();
        let Some(row) = tables.txs.get(&tx_id) else {
            return Ok(None);
        };
        let block = tables.blocks.get(&row.block_id).ok_or_else(|| {
            IndexerError::Storage(format!(
                "transaction {tx_id} references missing block {}",
                row.block_id
            ))
        })?;
        Ok(Some(TransactionView {
            row: row.clone(),
            block_hash: block.hash,
            timestamp: block.timestamp,
        }))
    }

    async fn token_transaction_ids_for_address(
        &self,
        token_id: TokenId,
        address: AddressId,
    ) -> Result<Vec<TxId>, IndexerError> {
        Ok(self
            .tables()
            .token_txs
            .values()
            .filter(|t| t.token_id == token_id && (t.sender == address || t.receiver == address))
            .map(|t| t.tx_id)
            .collect())
    }

    async fn token_transaction(
        &self,
        tx_id: TxId,
    ) -> Result<Option<TokenTransactionRow>, IndexerError> {
        Ok(self.tables().token_txs.get(&tx_id).cloned())
    }

    async fn load_tokens(&self) -> Result<Vec<TokenRow>, IndexerError> {
        Ok(self.tables().tokens.values().cloned().collect())
    }

    async fn rollback_to_address(&self, last_good: AddressId) -> Result<bool, IndexerError> {
        Ok(self.tables().rollback_to_address(last_good))
    }
}

fn lock(tables: &Mutex<MemoryTables>) -> MutexGuard<'_, MemoryTables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Uncommitted changes to one table.
#[derive(Debug)]
struct Staged<K, V> {
    put: BTreeMap<K, V>,
    removed: BTreeSet<K>,
}

impl<K, V> Default for Staged<K, V> {
    fn default() -> Self {
        Self {
            put: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Copy, V> Staged<K, V> {
    fn get<'a>(&'a self, base: &'a BTreeMap<K, V>, key: &K) -> Option<&'a V> {
        match self.put.get(key) {
            Some(value) => Some(value),
            None if self.removed.contains(key) => None,
            None => base.get(key),
        }
    }

    fn contains(&self, base: &BTreeMap<K, V>, key: &K) -> bool {
        self.get(base, key).is_some()
    }

    fn values<'a>(&'a self, base: &'a BTreeMap<K, V>) -> impl Iterator<Item = &'a V> + 'a {
        base.iter()
            .filter(|(k, _)| !self.removed.contains(*k) && !self.put.contains_key(*k))
            .map(|(_, v)| v)
            .chain(self.put.values())
    }

    /// Largest key ever seen, removed keys included.
    fn last_key(&self, base: &BTreeMap<K, V>) -> Option<K> {
        let base_last = base.keys().next_back().copied();
        let put_last = self.put.keys().next_back().copied();
        base_last.max(put_last)
    }

    fn insert(&mut self, key: K, value: V) {
        self.removed.remove(&key);
        self.put.insert(key, value);
    }

    fn remove(&mut self, key: K) {
        self.put.remove(&key);
        self.removed.insert(key);
    }

    fn apply(self, base: &mut BTreeMap<K, V>) {
        for key in self.removed {
            base.remove(&key);
        }
        base.extend(self.put);
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<MemoryTables>>,
    addresses: Staged<AddressId, String>,
    blocks: Staged<StorageId, BlockRow>,
    block_hashes: Staged<BlockHash, StorageId>,
    txs: Staged<TxId, TransactionRow>,
    token_txs: Staged<TxId, TokenTransactionRow>,
    tokens: Staged<TokenId, TokenRow>,
    /// `Some` once the head has been set in this transaction.
    declared_head: Option<Option<BlockHash>>,
}

fn duplicate(table: &str, key: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(format!("UNIQUE constraint failed: {table} {key}"))
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_address(&mut self, id: AddressId, address: &str) -> Result<(), IndexerError> {
        let shared = Arc::clone(&self.shared);
        let base = lock(&shared);
        if self.addresses.contains(&base.addresses, &id) {
            return Err(duplicate("addresses", id));
        }
        self.addresses.insert(id, address.to_string());
        Ok(())
    }

    async fn insert_block(&mut self, row: &BlockRow) -> Result<(), IndexerError> {
        let shared = Arc::clone(&self.shared);
        let base = lock(&shared);
        if self.blocks.contains(&base.blocks, &row.storage_id) {
            return Err(duplicate("blocks", row.storage_id));
        }
        if self.block_hashes.contains(&base.block_hashes, &row.hash) {
            return Err(duplicate("blocks.hash", row.hash));
        }
        self.block_hashes.insert(row.hash, row.storage_id);
        self.blocks.insert(row.storage_id, row.clone());
        Ok(())
    }

    async fn insert_transaction(&mut self, row: &TransactionRow) -> Result<(), IndexerError> {
        let shared = Arc::clone(&self.shared);
        let base = lock(&shared);
        if self.txs.contains(&base.txs, &row.id) {
            return Err(duplicate("txs", row.id));
        }
        self.txs.insert(row.id, row.clone());
        Ok(())
    }

    async fn insert_token_transaction(
        &mut self,
        row: &TokenTransactionRow,
    ) -> Result<(), IndexerError> {
        let shared = Arc::clone(&self.shared);
        let base = lock(&shared);
        if self.token_txs.contains(&base.token_txs, &row.tx_id) {
            return Err(duplicate("token_txs", row.tx_id));
        }
        self.token_txs.insert(row.tx_id, row.clone());
        Ok(())
    }

    async fn delete_block(&mut self, storage_id: StorageId) -> Result<(), IndexerError> {
        let shared = Arc::clone(&self.shared);
        let base = lock(&shared);
        let Some(row) = self.blocks.get(&base.blocks, &storage_id).cloned() else {
            return Ok(());
        };
        let owned = row.timestamp_item();
        for id in owned.tx_begin..owned.tx_end {
            self.token_txs.remove(id);
            self.txs.remove(id);
        }
        self.block_hashes.remove(row.hash);
        self.blocks.remove(storage_id);
        Ok(())
    }

    async fn set_declared_head(&mut self, head: Option<&BlockHash>) -> Result<(), IndexerError> {
        self.declared_head = Some(head.copied());
        Ok(())
    }

    async fn upsert_token(
        &mut self,
        name: &str,
        address: AddressId,
    ) -> Result<TokenId, IndexerError> {
        let shared = Arc::clone(&self.shared);
        let base = lock(&shared);
        let id = match self.tokens.values(&base.tokens).find(|t| t.name == name) {
            Some(token) => token.id,
            None => self.tokens.last_key(&base.tokens).map_or(1, |id| id + 1),
        };
        self.tokens.insert(
            id,
            TokenRow {
                id,
                name: name.to_string(),
                address,
            },
        );
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        let this = *self;
        let mut tables = lock(&this.shared);
        this.addresses.apply(&mut tables.addresses);
        this.blocks.apply(&mut tables.blocks);
        this.block_hashes.apply(&mut tables.block_hashes);
        this.txs.apply(&mut tables.txs);
        this.token_txs.apply(&mut tables.token_txs);
        this.tokens.apply(&mut tables.tokens);
        if let Some(head) = this.declared_head {
            tables.declared_head = head;
        }
        Ok(())
    }
}
