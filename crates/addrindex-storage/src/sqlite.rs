//! SQLite storage backend for AddrIndex.
//!
//! Persists addresses, blocks, transactions, token annotations and the
//! declared head to a single SQLite file. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use addrindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./addrindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use addrindex_core::error::IndexerError;
use addrindex_core::store::{
    BlockRow, IndexStore, StoreTransaction, TokenId, TokenRow, TokenTransactionRow,
    TransactionRow, TransactionView,
};
use addrindex_core::tracker::StoredBlock;
use addrindex_core::types::{
    AddressId, BlobHandle, BlockHash, Hash256, StorageId, TimestampItem, TxId,
};

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS addresses (
        id      INTEGER PRIMARY KEY,
        address TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS blocks (
        id                   INTEGER PRIMARY KEY,
        hash                 TEXT    NOT NULL UNIQUE,
        previous_hash        TEXT    NOT NULL,
        miner                INTEGER NOT NULL,
        timestamp            INTEGER NOT NULL,
        first_transaction_id INTEGER NOT NULL,
        transaction_count    INTEGER NOT NULL,
        average_gasprice     TEXT
    );",
    "CREATE TABLE IF NOT EXISTS txs (
        id               INTEGER PRIMARY KEY,
        hash             TEXT    NOT NULL,
        sender           INTEGER NOT NULL,
        receiver         INTEGER NOT NULL,
        amount           TEXT    NOT NULL,
        block_id         INTEGER NOT NULL,
        gas_price        TEXT    NOT NULL,
        gas_limit        TEXT    NOT NULL,
        contract_address INTEGER,
        gas_used         TEXT,
        input_offset     INTEGER,
        input_size       INTEGER,
        logs_offset      INTEGER,
        logs_size        INTEGER
    );",
    "CREATE INDEX IF NOT EXISTS idx_txs_sender   ON txs (sender);",
    "CREATE INDEX IF NOT EXISTS idx_txs_receiver ON txs (receiver);",
    "CREATE INDEX IF NOT EXISTS idx_txs_block    ON txs (block_id);",
    "CREATE TABLE IF NOT EXISTS tokens (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        name    TEXT    NOT NULL UNIQUE,
        address INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS token_txs (
        tx_id    INTEGER PRIMARY KEY,
        token_id INTEGER NOT NULL,
        function TEXT    NOT NULL,
        sender   INTEGER NOT NULL,
        receiver INTEGER NOT NULL,
        amount   TEXT    NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_token_txs_sender   ON token_txs (token_id, sender);",
    "CREATE INDEX IF NOT EXISTS idx_token_txs_receiver ON token_txs (token_id, receiver);",
    "CREATE TABLE IF NOT EXISTS blockchain_head (
        id   INTEGER PRIMARY KEY CHECK (id = 0),
        hash TEXT    NOT NULL
    );",
];

/// SQLite-backed relational store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./addrindex.db"`) or a full
    /// SQLite URL (`"sqlite:./addrindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(path, "sqlite store opened");
        Ok(store)
    }

    /// Open an existing database without write access. The schema is not
    /// created and every write fails.
    pub async fn open_read_only(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=ro")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        info!(path, "sqlite store opened read-only");
        Ok(Self { pool })
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection is kept for the pool's lifetime; every connection
    /// to `sqlite::memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn scalar_max(&self, sql: &str) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let max: Option<i64> = row.try_get(0).map_err(storage_err)?;
        Ok(max.map(|v| v as u64))
    }

    async fn ids(&self, sql: &str, binds: &[i64]) -> Result<Vec<u64>, IndexerError> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        Ok(rows
            .iter()
            .map(|r| r.get::<i64, _>(0) as u64)
            .collect())
    }
}

// ─── Row decoding ────────────────────────────────────────────────────────────

fn hash_col(row: &SqliteRow, column: &str) -> Result<Hash256, IndexerError> {
    let text: String = row.try_get(column).map_err(storage_err)?;
    Hash256::from_hex(&text)
        .map_err(|e| IndexerError::Storage(format!("bad hash in column {column}: {e}")))
}

fn blob_cols(row: &SqliteRow, offset: &str, size: &str) -> Option<BlobHandle> {
    let offset: Option<i64> = row.get(offset);
    let size: Option<i64> = row.get(size);
    match (offset, size) {
        (Some(offset), Some(size)) => Some(BlobHandle {
            offset: offset as u64,
            size: size as u64,
        }),
        _ => None,
    }
}

fn block_row(row: &SqliteRow) -> Result<BlockRow, IndexerError> {
    Ok(BlockRow {
        storage_id: row.get::<i64, _>("id") as u64,
        hash: hash_col(row, "hash")?,
        previous_hash: hash_col(row, "previous_hash")?,
        miner: row.get::<i64, _>("miner") as u64,
        timestamp: row.get("timestamp"),
        first_transaction_id: row.get::<i64, _>("first_transaction_id") as u64,
        transaction_count: row.get::<i64, _>("transaction_count") as u32,
        average_gas_price: row.get("average_gasprice"),
    })
}

fn transaction_row(row: &SqliteRow) -> Result<TransactionRow, IndexerError> {
    Ok(TransactionRow {
        id: row.get::<i64, _>("id") as u64,
        hash: hash_col(row, "hash")?,
        sender: row.get::<i64, _>("sender") as u64,
        receiver: row.get::<i64, _>("receiver") as u64,
        amount: row.get("amount"),
        block_id: row.get::<i64, _>("block_id") as u64,
        gas_price: row.get("gas_price"),
        gas_limit: row.get("gas_limit"),
        contract_address: row.get::<Option<i64>, _>("contract_address").map(|v| v as u64),
        gas_used: row.get("gas_used"),
        input: blob_cols(row, "input_offset", "input_size"),
        logs: blob_cols(row, "logs_offset", "logs_size"),
    })
}

fn token_transaction_row(row: &SqliteRow) -> TokenTransactionRow {
    TokenTransactionRow {
        tx_id: row.get::<i64, _>("tx_id") as u64,
        token_id: row.get::<i64, _>("token_id") as u64,
        function: row.get("function"),
        sender: row.get::<i64, _>("sender") as u64,
        receiver: row.get::<i64, _>("receiver") as u64,
        amount: row.get("amount"),
    }
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn load_addresses(&self) -> Result<Vec<(AddressId, String)>, IndexerError> {
        let rows = sqlx::query("SELECT id, address FROM addresses ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("id") as u64, r.get("address")))
            .collect())
    }

    async fn load_blocks(&self) -> Result<Vec<StoredBlock>, IndexerError> {
        let rows = sqlx::query("SELECT id, hash, previous_hash FROM blocks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|r| -> Result<StoredBlock, IndexerError> {
                Ok(StoredBlock {
                    storage_id: r.get::<i64, _>("id") as u64,
                    hash: hash_col(r, "hash")?,
                    previous_hash: hash_col(r, "previous_hash")?,
                })
            })
            .collect()
    }

    async fn declared_head(&self) -> Result<Option<BlockHash>, IndexerError> {
        let row = sqlx::query("SELECT hash FROM blockchain_head WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| hash_col(&r, "hash")).transpose()
    }

    async fn load_timestamp_items(&self) -> Result<Vec<TimestampItem>, IndexerError> {
        let rows = sqlx::query(
            "SELECT first_transaction_id, transaction_count, timestamp FROM blocks
             WHERE transaction_count != 0 ORDER BY first_transaction_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows
            .iter()
            .map(|r| {
                let begin = r.get::<i64, _>("first_transaction_id") as u64;
                TimestampItem {
                    tx_begin: begin,
                    tx_end: begin + r.get::<i64, _>("transaction_count") as u64,
                    timestamp: r.get("timestamp"),
                }
            })
            .collect())
    }

    async fn max_transaction_id(&self) -> Result<Option<TxId>, IndexerError> {
        self.scalar_max("SELECT MAX(id) FROM txs").await
    }

    async fn max_block_id(&self) -> Result<Option<StorageId>, IndexerError> {
        self.scalar_max("SELECT MAX(id) FROM blocks").await
    }

    async fn block_row(&self, storage_id: StorageId) -> Result<Option<BlockRow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE id = ?")
            .bind(storage_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(block_row).transpose()
    }

    async fn transaction_ids_for_address(
        &self,
        address: AddressId,
    ) -> Result<Vec<TxId>, IndexerError> {
        self.ids(
            "SELECT id FROM txs WHERE sender = ? UNION SELECT id FROM txs WHERE receiver = ?",
            &[address as i64, address as i64],
        )
        .await
    }

    async fn transaction_view(
        &self,
        tx_id: TxId,
    ) -> Result<Option<TransactionView>, IndexerError> {
        let row = sqlx::query(
            "SELECT t.*, b.hash AS block_hash, b.timestamp AS block_timestamp
             FROM txs t JOIN blocks b ON b.id = t.block_id WHERE t.id = ?",
        )
        .bind(tx_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TransactionView {
            row: transaction_row(&row)?,
            block_hash: hash_col(&row, "block_hash")?,
            timestamp: row.get("block_timestamp"),
        }))
    }

    async fn token_transaction_ids_for_address(
        &self,
        token_id: TokenId,
        address: AddressId,
    ) -> Result<Vec<TxId>, IndexerError> {
        self.ids(
            "SELECT tx_id FROM token_txs WHERE token_id = ? AND sender = ?
             UNION SELECT tx_id FROM token_txs WHERE token_id = ? AND receiver = ?",
            &[token_id as i64, address as i64, token_id as i64, address as i64],
        )
        .await
    }

    async fn token_transaction(
        &self,
        tx_id: TxId,
    ) -> Result<Option<TokenTransactionRow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM token_txs WHERE tx_id = ?")
            .bind(tx_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(token_transaction_row))
    }

    async fn load_tokens(&self) -> Result<Vec<TokenRow>, IndexerError> {
        let rows = sqlx::query("SELECT id, name, address FROM tokens ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .iter()
            .map(|r| TokenRow {
                id: r.get::<i64, _>("id") as u64,
                name: r.get("name"),
                address: r.get::<i64, _>("address") as u64,
            })
            .collect())
    }

    async fn rollback_to_address(&self, last_good: AddressId) -> Result<bool, IndexerError> {
        let bound = last_good as i64;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let first_bad_block: Option<i64> = sqlx::query(
            "SELECT MIN(block_id) FROM (
                SELECT id AS block_id FROM blocks WHERE miner > ?
                UNION ALL
                SELECT block_id FROM txs
                 WHERE sender > ? OR receiver > ? OR contract_address > ?
                UNION ALL
                SELECT t.block_id FROM token_txs k JOIN txs t ON t.id = k.tx_id
                 WHERE k.sender > ? OR k.receiver > ?
            )",
        )
        .bind(bound)
        .bind(bound)
        .bind(bound)
        .bind(bound)
        .bind(bound)
        .bind(bound)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?
        .try_get(0)
        .map_err(storage_err)?;

        let mut deleted = 0u64;
        if let Some(block_id) = first_bad_block {
            let first_tx: i64 = sqlx::query("SELECT first_transaction_id FROM blocks WHERE id = ?")
                .bind(block_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage_err)?
                .get(0);

            for (sql, bind) in [
                ("DELETE FROM token_txs WHERE tx_id >= ?", first_tx),
                ("DELETE FROM txs WHERE id >= ?", first_tx),
                ("DELETE FROM blocks WHERE id >= ?", block_id),
            ] {
                deleted += sqlx::query(sql)
                    .bind(bind)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?
                    .rows_affected();
            }
            debug!(block_id, first_tx, "rows after first bad block deleted");
        }

        for sql in [
            "DELETE FROM addresses WHERE id > ?",
            "DELETE FROM tokens WHERE address > ?",
        ] {
            deleted += sqlx::query(sql)
                .bind(bound)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
        }

        if deleted > 0 {
            sqlx::query("DELETE FROM blockchain_head")
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        info!(last_good, deleted, "store rolled back to address id");
        Ok(deleted > 0)
    }
}

// ─── StoreTransaction impl ───────────────────────────────────────────────────

/// An open SQLite transaction. Dropping it rolls back.
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn insert_address(&mut self, id: AddressId, address: &str) -> Result<(), IndexerError> {
        sqlx::query("INSERT INTO addresses (id, address) VALUES (?, ?)")
            .bind(id as i64)
            .bind(address)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_block(&mut self, row: &BlockRow) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO blocks
             (id, hash, previous_hash, miner, timestamp, first_transaction_id,
              transaction_count, average_gasprice)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.storage_id as i64)
        .bind(row.hash.to_hex())
        .bind(row.previous_hash.to_hex())
        .bind(row.miner as i64)
        .bind(row.timestamp)
        .bind(row.first_transaction_id as i64)
        .bind(i64::from(row.transaction_count))
        .bind(row.average_gas_price.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_transaction(&mut self, row: &TransactionRow) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO txs
             (id, hash, sender, receiver, amount, block_id, gas_price, gas_limit,
              contract_address, gas_used, input_offset, input_size, logs_offset, logs_size)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id as i64)
        .bind(row.hash.to_hex())
        .bind(row.sender as i64)
        .bind(row.receiver as i64)
        .bind(&row.amount)
        .bind(row.block_id as i64)
        .bind(&row.gas_price)
        .bind(&row.gas_limit)
        .bind(row.contract_address.map(|v| v as i64))
        .bind(row.gas_used.as_deref())
        .bind(row.input.map(|h| h.offset as i64))
        .bind(row.input.map(|h| h.size as i64))
        .bind(row.logs.map(|h| h.offset as i64))
        .bind(row.logs.map(|h| h.size as i64))
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_token_transaction(
        &mut self,
        row: &TokenTransactionRow,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO token_txs (tx_id, token_id, function, sender, receiver, amount)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.tx_id as i64)
        .bind(row.token_id as i64)
        .bind(&row.function)
        .bind(row.sender as i64)
        .bind(row.receiver as i64)
        .bind(&row.amount)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_block(&mut self, storage_id: StorageId) -> Result<(), IndexerError> {
        let id = storage_id as i64;
        for sql in [
            "DELETE FROM token_txs WHERE tx_id IN (SELECT id FROM txs WHERE block_id = ?)",
            "DELETE FROM txs WHERE block_id = ?",
            "DELETE FROM blocks WHERE id = ?",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(storage_err)?;
        }
        debug!(storage_id, "block rows deleted");
        Ok(())
    }

    async fn set_declared_head(&mut self, head: Option<&BlockHash>) -> Result<(), IndexerError> {
        let query = match head {
            Some(hash) => sqlx::query("INSERT OR REPLACE INTO blockchain_head (id, hash) VALUES (0, ?)")
                .bind(hash.to_hex()),
            None => sqlx::query("DELETE FROM blockchain_head"),
        };
        query.execute(&mut *self.tx).await.map_err(storage_err)?;
        Ok(())
    }

    async fn upsert_token(
        &mut self,
        name: &str,
        address: AddressId,
    ) -> Result<TokenId, IndexerError> {
        sqlx::query(
            "INSERT INTO tokens (name, address) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET address = excluded.address",
        )
        .bind(name)
        .bind(address as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;

        let id: i64 = sqlx::query("SELECT id FROM tokens WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage_err)?
            .get(0);
        Ok(id as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        self.tx.commit().await.map_err(storage_err)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use addrindex_core::config::IndexConfig;
    use addrindex_core::coordinator::{IndexCoordinator, IngestOutcome};
    use addrindex_core::types::{IngestBlock, IngestTransaction, Receipt};

    use super::*;

    fn h(n: u8) -> BlockHash {
        Hash256::new([n; 32])
    }

    fn block(id: StorageId, first_tx: TxId, count: u32, miner: AddressId) -> BlockRow {
        BlockRow {
            storage_id: id,
            hash: h(id as u8),
            previous_hash: h(id as u8 - 1),
            miner,
            timestamp: 1_700_000_000 + id as i64,
            first_transaction_id: first_tx,
            transaction_count: count,
            average_gas_price: (count > 0).then(|| "1000000000".to_string()),
        }
    }

    fn tx(id: TxId, block_id: StorageId, sender: AddressId, receiver: AddressId) -> TransactionRow {
        TransactionRow {
            id,
            hash: Hash256::new([0x40 + id as u8; 32]),
            sender,
            receiver,
            amount: "1000000000000000000".into(),
            block_id,
            gas_price: "1000000000".into(),
            gas_limit: "21000".into(),
            contract_address: None,
            gas_used: Some("21000".into()),
            input: Some(BlobHandle { offset: 10 * id, size: 0 }),
            logs: None,
        }
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut t = store.begin().await.unwrap();
        for (id, a) in [(1, "0x01"), (2, "0x02"), (3, "0x03"), (4, "0x04")] {
            t.insert_address(id, a).await.unwrap();
        }
        t.insert_block(&block(1, 1, 1, 1)).await.unwrap();
        t.insert_transaction(&tx(1, 1, 2, 3)).await.unwrap();
        t.insert_block(&block(2, 2, 0, 1)).await.unwrap();
        t.insert_block(&block(3, 2, 2, 1)).await.unwrap();
        t.insert_transaction(&tx(2, 3, 2, 3)).await.unwrap();
        t.insert_transaction(&tx(3, 3, 3, 4)).await.unwrap();
        let token = t.upsert_token("TKN", 3).await.unwrap();
        t.insert_token_transaction(&TokenTransactionRow {
            tx_id: 3,
            token_id: token,
            function: "transfer".into(),
            sender: 3,
            receiver: 2,
            amount: "5".into(),
        })
        .await
        .unwrap();
        t.set_declared_head(Some(&h(3))).await.unwrap();
        t.commit().await.unwrap();
        store
    }

    // ── Rows ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rows_roundtrip() {
        let store = seeded().await;

        let addresses = store.load_addresses().await.unwrap();
        assert_eq!(addresses[0], (1, "0x01".to_string()));
        assert_eq!(addresses.len(), 4);

        let blocks = store.load_blocks().await.unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].previous_hash, h(2));
        assert_eq!(store.declared_head().await.unwrap(), Some(h(3)));
        assert_eq!(store.block_row(3).await.unwrap().unwrap(), block(3, 2, 2, 1));
        assert_eq!(store.max_block_id().await.unwrap(), Some(3));
        assert_eq!(store.max_transaction_id().await.unwrap(), Some(3));

        let view = store.transaction_view(2).await.unwrap().unwrap();
        assert_eq!(view.row, tx(2, 3, 2, 3));
        assert_eq!(view.block_hash, h(3));
        assert_eq!(view.timestamp, 1_700_000_003);
        assert!(store.transaction_view(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_store_has_no_maxima() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.max_block_id().await.unwrap(), None);
        assert_eq!(store.max_transaction_id().await.unwrap(), None);
        assert_eq!(store.declared_head().await.unwrap(), None);
    }

    #[tokio::test]
    async fn timestamp_items_skip_empty_blocks() {
        let store = seeded().await;
        let items = store.load_timestamp_items().await.unwrap();
        assert_eq!(
            items,
            vec![
                TimestampItem { tx_begin: 1, tx_end: 2, timestamp: 1_700_000_001 },
                TimestampItem { tx_begin: 2, tx_end: 4, timestamp: 1_700_000_003 },
            ]
        );
    }

    #[tokio::test]
    async fn address_queries() {
        let store = seeded().await;
        let mut ids = store.transaction_ids_for_address(3).await.unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.token_transaction_ids_for_address(1, 2).await.unwrap(), vec![3]);
        assert!(store.token_transaction_ids_for_address(2, 2).await.unwrap().is_empty());
        assert_eq!(store.token_transaction(3).await.unwrap().unwrap().amount, "5");
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = seeded().await;
        {
            let mut t = store.begin().await.unwrap();
            t.insert_address(5, "0x05").await.unwrap();
            t.delete_block(3).await.unwrap();
        }
        assert_eq!(store.load_addresses().await.unwrap().len(), 4);
        assert_eq!(store.load_blocks().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_block_removes_dependents() {
        let store = seeded().await;
        let mut t = store.begin().await.unwrap();
        t.delete_block(3).await.unwrap();
        t.set_declared_head(Some(&h(2))).await.unwrap();
        t.commit().await.unwrap();

        assert_eq!(store.load_blocks().await.unwrap().len(), 2);
        assert_eq!(store.max_transaction_id().await.unwrap(), Some(1));
        assert!(store.token_transaction(3).await.unwrap().is_none());
        assert_eq!(store.declared_head().await.unwrap(), Some(h(2)));
    }

    #[tokio::test]
    async fn duplicate_block_hash_fails() {
        let store = seeded().await;
        let mut t = store.begin().await.unwrap();
        let mut dup = block(9, 10, 0, 1);
        dup.hash = h(1);
        assert!(matches!(t.insert_block(&dup).await, Err(IndexerError::Storage(_))));
    }

    #[tokio::test]
    async fn upsert_token_keeps_id() {
        let store = seeded().await;
        let mut t = store.begin().await.unwrap();
        let again = t.upsert_token("TKN", 4).await.unwrap();
        t.commit().await.unwrap();
        let tokens = store.load_tokens().await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].id, again);
        assert_eq!(tokens[0].address, 4);
    }

    // ── Rollback to address ───────────────────────────────────────────────────

    #[tokio::test]
    async fn rollback_to_address_cuts_from_first_reference() {
        let store = seeded().await;
        assert!(store.rollback_to_address(3).await.unwrap());

        assert_eq!(store.load_blocks().await.unwrap().len(), 2);
        assert_eq!(store.max_transaction_id().await.unwrap(), Some(1));
        assert_eq!(store.load_addresses().await.unwrap().len(), 3);
        assert_eq!(store.declared_head().await.unwrap(), None);
        assert_eq!(store.load_tokens().await.unwrap().len(), 1);

        assert!(!store.rollback_to_address(3).await.unwrap());
    }

    #[tokio::test]
    async fn rollback_to_address_via_miner() {
        let store = seeded().await;
        assert!(store.rollback_to_address(0).await.unwrap());
        assert!(store.load_blocks().await.unwrap().is_empty());
        assert_eq!(store.max_transaction_id().await.unwrap(), None);
        assert!(store.load_addresses().await.unwrap().is_empty());
        assert!(store.load_tokens().await.unwrap().is_empty());
    }

    // ── Coordinator on SQLite ─────────────────────────────────────────────────

    fn ingest_block(n: u8, parent: u8, txs: Vec<IngestTransaction>) -> IngestBlock {
        IngestBlock {
            number: u64::from(n),
            hash: h(n),
            parent_hash: h(parent),
            timestamp: 1_700_000_000 + i64::from(n),
            miner: "0x00000000000000000000000000000000000000aa".into(),
            transactions: txs,
        }
    }

    fn payment(n: u8, from: &str, to: &str) -> IngestTransaction {
        IngestTransaction {
            hash: Hash256::new([0x80 + n; 32]),
            from: Some(from.into()),
            to: Some(to.into()),
            value: "7".into(),
            gas_price: "3".into(),
            gas_limit: "21000".into(),
            input: vec![],
            receipt: Some(Receipt {
                contract_address: None,
                gas_used: "21000".into(),
                status: Some(true),
                logs: serde_json::json!([]),
            }),
        }
    }

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const BOB: &str = "0x0000000000000000000000000000000000000b0b";

    #[tokio::test]
    async fn coordinator_survives_reorg_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let path = path.to_str().unwrap();

        {
            let store = Arc::new(SqliteStore::open(path).await.unwrap());
            let coord = IndexCoordinator::open(IndexConfig::default(), store).await.unwrap();
            coord.ingest(&ingest_block(1, 0, vec![])).await.unwrap();
            coord.ingest(&ingest_block(2, 1, vec![payment(2, ALICE, BOB)])).await.unwrap();
            coord.ingest(&ingest_block(3, 2, vec![payment(3, BOB, ALICE)])).await.unwrap();

            let outcome = coord
                .ingest(&ingest_block(4, 2, vec![payment(4, ALICE, BOB)]))
                .await
                .unwrap();
            assert_eq!(
                outcome,
                IngestOutcome::Committed { height: 2, storage_id: 4, reverted: 1 }
            );
        }

        let store = Arc::new(SqliteStore::open(path).await.unwrap());
        let coord = IndexCoordinator::open(IndexConfig::default(), store).await.unwrap();
        assert_eq!(coord.tip_hash().await.unwrap(), Some(h(4)));
        assert_eq!(coord.indexed_height().await.unwrap(), Some(2));

        let history = coord.history(&[BOB.to_string()], 10, false).await.unwrap();
        let hashes: Vec<_> = history.iter().map(|r| r.hash).collect();
        assert_eq!(hashes, vec![Hash256::new([0x84; 32]), Hash256::new([0x82; 32])]);
        assert_eq!(coord.fee_estimate().await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn read_only_store_serves_queries_and_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let path = path.to_str().unwrap();

        let writer = Arc::new(SqliteStore::open(path).await.unwrap());
        let coord = IndexCoordinator::open(IndexConfig::default(), writer).await.unwrap();
        coord.ingest(&ingest_block(1, 0, vec![])).await.unwrap();
        coord.ingest(&ingest_block(2, 1, vec![payment(2, ALICE, BOB)])).await.unwrap();

        let reader = SqliteStore::open_read_only(path).await.unwrap();
        let mut t = reader.begin().await.unwrap();
        assert!(t.insert_address(99, "0x99").await.is_err());
        drop(t);

        let view = IndexCoordinator::open_read_only(IndexConfig::default(), Arc::new(reader))
            .await
            .unwrap();
        assert_eq!(view.tip_hash().await.unwrap(), Some(h(2)));
        let history = view.history(&[ALICE.to_string()], 10, true).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].hash, Hash256::new([0x82; 32]));
    }
}
