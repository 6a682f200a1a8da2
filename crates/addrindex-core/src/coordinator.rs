//! Ingestion coordinator: the single writer and the query surface.
//!
//! All in-memory state (chain tracker, address cache, order index, id
//! counters) sits behind one `RwLock`. Ingestion holds the write guard for
//! the whole store transaction; queries hold the read guard, so a reader
//! never sees a half-applied block.
//!
//! When anything fails mid-ingestion the store transaction is dropped
//! (rolled back) and the in-memory state is rebuilt from the store. State is
//! flagged stale for the whole write and the flag is cleared only once memory
//! matches the store again. While it is set, queries return
//! [`IndexerError::StaleState`] and the next ingestion reloads first.

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

use crate::address::AddressCache;
use crate::blob::BinaryBlobStore;
use crate::config::IndexConfig;
use crate::error::IndexerError;
use crate::order::OrderIndex;
use crate::store::{BlockRow, IndexStore, StoreTransaction, TokenRow, TokenTransactionRow, TransactionRow};
use crate::token::{parse_transfer, transaction_succeeded};
use crate::tracker::{ChainTracker, InMemoryChainTracker};
use crate::types::{
    AddressId, Block, BlockHash, ChainReorganization, IngestBlock, IngestTransaction, OrderKey,
    StorageId, TimestampItem, TransactionRecord, TxId,
};

/// Address recorded when a transaction has no sender or no receiver.
pub const NO_ADDRESS: &str = "0x00";

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of ingesting one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Committed {
        height: u64,
        storage_id: StorageId,
        /// Number of blocks reverted to make room.
        reverted: usize,
    },
    /// The block is already part of the canonical chain.
    AlreadyIndexed { height: u64 },
    /// The parent is unknown. Ingest this ancestor first, then retry.
    BlockRequired(BlockHash),
}

/// Result of ingesting a batch of blocks in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Outcomes of the committed prefix, in input order.
    pub applied: Vec<IngestOutcome>,
    /// Set when the batch stopped early on an unknown parent. Blocks after
    /// `applied` were not touched.
    pub block_required: Option<BlockHash>,
}

impl BatchOutcome {
    pub fn committed(&self) -> usize {
        self.applied
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Committed { .. }))
            .count()
    }
}

/// Snapshot of the indexer's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub network: String,
    /// External height of the tip.
    pub height: Option<u64>,
    pub tip: Option<BlockHash>,
    pub tip_time: Option<DateTime<Utc>>,
    pub addresses: usize,
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Everything that is rebuilt from the store.
struct ChainState {
    tracker: Box<dyn ChainTracker>,
    cache: AddressCache,
    order: OrderIndex,
    next_tx_id: TxId,
    next_block_id: StorageId,
    tokens: Vec<TokenRow>,
}

struct BlobStores {
    inputs: BinaryBlobStore,
    logs: BinaryBlobStore,
}

struct EngineState {
    chain: ChainState,
    blobs: Option<BlobStores>,
    /// Set while memory may disagree with the store.
    stale: bool,
}

enum Applied {
    Outcome(IngestOutcome, Option<TimestampItem>),
    Required(BlockHash),
}

/// A committed batch whose order index update is still pending.
struct CommittedBatch {
    outcome: BatchOutcome,
    items: Vec<TimestampItem>,
    reverted: usize,
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

pub struct IndexCoordinator {
    config: IndexConfig,
    store: Arc<dyn IndexStore>,
    read_only: bool,
    state: RwLock<EngineState>,
}

impl IndexCoordinator {
    /// Rebuild all in-memory state from `store` and register configured
    /// tokens. An inconsistent address table is repaired by rolling the
    /// store back to the last id that replays correctly.
    pub async fn open(config: IndexConfig, store: Arc<dyn IndexStore>) -> Result<Self, IndexerError> {
        Self::open_mode(config, store, false).await
    }

    /// Open for queries only. Nothing is written to the store: configured
    /// tokens are not registered, an inconsistent address table is reported
    /// instead of repaired, blob files are not opened and ingestion is
    /// refused.
    pub async fn open_read_only(
        config: IndexConfig,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self, IndexerError> {
        Self::open_mode(config, store, true).await
    }

    async fn open_mode(
        config: IndexConfig,
        store: Arc<dyn IndexStore>,
        read_only: bool,
    ) -> Result<Self, IndexerError> {
        config.validate()?;

        let blobs = match (&config.inputs_path, &config.logs_path) {
            (Some(inputs), Some(logs)) if config.record_binary_buffers && !read_only => {
                Some(BlobStores {
                    inputs: BinaryBlobStore::open(inputs)?,
                    logs: BinaryBlobStore::open(logs)?,
                })
            }
            _ => None,
        };

        let mut chain = load_chain_state(&config, store.as_ref(), !read_only).await?;
        if !config.tokens.is_empty() && !read_only {
            let mut tx = store.begin().await?;
            for token in &config.tokens {
                let address = chain.cache.encode(&token.address, tx.as_mut()).await?;
                let id = tx.upsert_token(&token.name, address).await?;
                debug!(token = %token.name, id, address, "token registered");
            }
            tx.commit().await?;
            chain.tokens = store.load_tokens().await?;
        }

        info!(
            network = %config.network,
            height = ?chain.tracker.tip().map(|b| b.height + config.network.height_offset()),
            addresses = chain.cache.len(),
            tokens = chain.tokens.len(),
            binary_buffers = blobs.is_some(),
            read_only,
            "index coordinator opened"
        );

        Ok(Self {
            config,
            store,
            read_only,
            state: RwLock::new(EngineState {
                chain,
                blobs,
                stale: false,
            }),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    // ─── Ingestion ───────────────────────────────────────────────────────────

    /// Ingest one block in its own transaction.
    pub async fn ingest(&self, block: &IngestBlock) -> Result<IngestOutcome, IndexerError> {
        let mut batch = self.ingest_batch(std::slice::from_ref(block)).await?;
        if let Some(hash) = batch.block_required {
            return Ok(IngestOutcome::BlockRequired(hash));
        }
        batch
            .applied
            .pop()
            .ok_or_else(|| IndexerError::Other("empty ingestion result".into()))
    }

    /// Ingest blocks in order as one transaction.
    ///
    /// An unknown parent stops the batch: the processed prefix is committed
    /// and the missing hash is reported.
    pub async fn ingest_batch(&self, blocks: &[IngestBlock]) -> Result<BatchOutcome, IndexerError> {
        if self.read_only {
            return Err(IndexerError::ReadOnly);
        }
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.stale {
            self.restore(state).await?;
        }

        // Cleared below once memory matches the store. A cancelled future
        // leaves it set.
        state.stale = true;
        let batch = match self.apply_batch(state, blocks).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "ingestion failed, rolling back");
                if let Err(reload) = self.restore(state).await {
                    error!(error = %reload, "could not reload state after rollback");
                }
                return Err(e);
            }
        };

        match self.update_order(state, &batch).await {
            Ok(()) => state.stale = false,
            Err(e) => warn!(
                error = %e,
                "batch committed but the order index could not be reloaded, state marked stale"
            ),
        }
        Ok(batch.outcome)
    }

    /// Apply and commit `blocks`. Memory and store agree on return except for
    /// the order index of the committed blocks.
    async fn apply_batch(
        &self,
        state: &mut EngineState,
        blocks: &[IngestBlock],
    ) -> Result<CommittedBatch, IndexerError> {
        let mut tx = self.store.begin().await?;
        let mut batch = CommittedBatch {
            outcome: BatchOutcome::default(),
            items: Vec::new(),
            reverted: 0,
        };

        for block in blocks {
            match self.apply_block(state, tx.as_mut(), block).await? {
                Applied::Required(hash) => {
                    debug!(block = %block.hash, missing = %hash, "parent unknown, stopping batch");
                    batch.outcome.block_required = Some(hash);
                    break;
                }
                Applied::Outcome(result, item) => {
                    if let IngestOutcome::Committed { reverted: r, .. } = &result {
                        batch.reverted += r;
                    }
                    batch.items.extend(item);
                    batch.outcome.applied.push(result);
                }
            }
        }

        let committed = batch.outcome.committed();
        if committed == 0 {
            // Nothing changed; dropping the transaction rolls it back.
            return Ok(batch);
        }

        tx.set_declared_head(state.chain.tracker.tip_hash().as_ref())
            .await?;
        if let Some(blobs) = state.blobs.as_mut() {
            blobs.inputs.sync()?;
            blobs.logs.sync()?;
        }
        tx.commit().await?;

        info!(
            blocks = committed,
            reverted = batch.reverted,
            tip = ?state.chain.tracker.tip_hash(),
            height = ?state.chain.tracker.tip().map(|b| b.height),
            "ingestion committed"
        );
        Ok(batch)
    }

    async fn update_order(
        &self,
        state: &mut EngineState,
        batch: &CommittedBatch,
    ) -> Result<(), IndexerError> {
        if batch.reverted > 0 {
            let items = self.store.load_timestamp_items().await?;
            state.chain.order.reload(items);
        } else {
            for item in &batch.items {
                state.chain.order.append_block(*item);
            }
        }
        Ok(())
    }

    async fn apply_block(
        &self,
        state: &mut EngineState,
        tx: &mut dyn StoreTransaction,
        block: &IngestBlock,
    ) -> Result<Applied, IndexerError> {
        let chain = &mut state.chain;
        if let Some(height) = chain.tracker.height_of(&block.hash) {
            debug!(block = %block.hash, height, "block already indexed");
            return Ok(Applied::Outcome(IngestOutcome::AlreadyIndexed { height }, None));
        }

        let revert = match chain.tracker.probe(&block.parent_hash) {
            ChainReorganization::BlockRequired(hash) => return Ok(Applied::Required(hash)),
            ChainReorganization::Attach { revert, .. } => revert,
        };
        if !revert.is_empty() {
            warn!(
                depth = revert.len(),
                fork_parent = %block.parent_hash,
                new_block = %block.hash,
                "chain reorganization"
            );
        }
        for old in &revert {
            tx.delete_block(old.storage_id).await?;
            chain.tracker.revert_tip(&old.hash)?;
            debug!(block = %old.hash, height = old.height, "block reverted");
        }

        let storage_id = chain.next_block_id;
        let height = chain
            .tracker
            .commit(block.hash, block.parent_hash, storage_id)?;
        chain.next_block_id += 1;

        let first_tx = chain.next_tx_id;
        let count = u32::try_from(block.transactions.len())
            .map_err(|_| IndexerError::Other(format!("block {} has too many transactions", block.hash)))?;
        let miner = chain.cache.encode(&block.miner, tx).await?;
        tx.insert_block(&BlockRow {
            storage_id,
            hash: block.hash,
            previous_hash: block.parent_hash,
            miner,
            timestamp: block.timestamp,
            first_transaction_id: first_tx,
            transaction_count: count,
            average_gas_price: mean_gas_price(&block.transactions)?,
        })
        .await?;

        for (offset, transaction) in block.transactions.iter().enumerate() {
            let id = first_tx + offset as TxId;
            self.write_transaction(state, tx, id, storage_id, transaction)
                .await?;
        }
        state.chain.next_tx_id = first_tx + u64::from(count);

        debug!(
            block = %block.hash,
            height,
            storage_id,
            transactions = count,
            "block applied"
        );
        let item = TimestampItem {
            tx_begin: first_tx,
            tx_end: first_tx + u64::from(count),
            timestamp: block.timestamp,
        };
        Ok(Applied::Outcome(
            IngestOutcome::Committed {
                height,
                storage_id,
                reverted: revert.len(),
            },
            Some(item),
        ))
    }

    async fn write_transaction(
        &self,
        state: &mut EngineState,
        tx: &mut dyn StoreTransaction,
        id: TxId,
        block_id: StorageId,
        t: &IngestTransaction,
    ) -> Result<(), IndexerError> {
        let cache = &mut state.chain.cache;
        let sender = cache
            .encode(t.from.as_deref().unwrap_or(NO_ADDRESS), tx)
            .await?;
        let receiver = cache
            .encode(t.to.as_deref().unwrap_or(NO_ADDRESS), tx)
            .await?;
        let contract_address = match t.receipt.as_ref().and_then(|r| r.contract_address.as_deref()) {
            Some(address) => Some(cache.encode(address, tx).await?),
            None => None,
        };

        let (input, logs) = match state.blobs.as_mut() {
            Some(blobs) => {
                let logs_bytes = match &t.receipt {
                    Some(r) if r.has_logs() => serde_json::to_vec(&r.logs)
                        .map_err(|e| IndexerError::Other(format!("cannot encode logs of {}: {e}", t.hash)))?,
                    _ => Vec::new(),
                };
                (
                    Some(blobs.inputs.insert(&t.input)?),
                    Some(blobs.logs.insert(&logs_bytes)?),
                )
            }
            None => (None, None),
        };

        tx.insert_transaction(&TransactionRow {
            id,
            hash: t.hash,
            sender,
            receiver,
            amount: t.value.clone(),
            block_id,
            gas_price: t.gas_price.clone(),
            gas_limit: t.gas_limit.clone(),
            contract_address,
            gas_used: t.receipt.as_ref().map(|r| r.gas_used.clone()),
            input,
            logs,
        })
        .await?;

        let Some(token_id) = state
            .chain
            .tokens
            .iter()
            .find(|token| t.to.is_some() && token.address == receiver)
            .map(|token| token.id)
        else {
            return Ok(());
        };
        if !transaction_succeeded(self.config.network, t) {
            return Ok(());
        }
        let Some(transfer) = parse_transfer(&t.input) else {
            return Ok(());
        };
        let cache = &mut state.chain.cache;
        let from = match transfer.from.as_deref() {
            Some(address) => cache.encode(address, tx).await?,
            None => sender,
        };
        let to = cache.encode(&transfer.to, tx).await?;
        tx.insert_token_transaction(&TokenTransactionRow {
            tx_id: id,
            token_id,
            function: transfer.function.to_string(),
            sender: from,
            receiver: to,
            amount: transfer.amount,
        })
        .await?;
        Ok(())
    }

    /// Rebuild the in-memory state from the store now instead of waiting for
    /// the next ingestion.
    pub async fn reload(&self) -> Result<(), IndexerError> {
        let mut state = self.state.write().await;
        self.restore(&mut state).await
    }

    /// Replace the in-memory state with what the store holds.
    async fn restore(&self, state: &mut EngineState) -> Result<(), IndexerError> {
        let chain = load_chain_state(&self.config, self.store.as_ref(), !self.read_only).await?;
        state.chain = chain;
        state.stale = false;
        info!(
            tip = ?state.chain.tracker.tip_hash(),
            "in-memory state reloaded from store"
        );
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    async fn read_state(&self) -> Result<RwLockReadGuard<'_, EngineState>, IndexerError> {
        let state = self.state.read().await;
        if state.stale {
            return Err(IndexerError::StaleState);
        }
        Ok(state)
    }

    /// Transactions touching any of `addresses`, ordered by block time and
    /// position in block. Unknown addresses are skipped.
    pub async fn history(
        &self,
        addresses: &[String],
        max_count: usize,
        oldest_first: bool,
    ) -> Result<Vec<TransactionRecord>, IndexerError> {
        let state = self.read_state().await?;
        let chain = &state.chain;

        let mut tx_ids = BTreeSet::new();
        for address in addresses {
            if let Some(id) = chain.cache.encode_if_present(address) {
                tx_ids.extend(self.store.transaction_ids_for_address(id).await?);
            }
        }
        let selected = select(&chain.order, tx_ids, max_count, oldest_first)?;

        let mut records = Vec::with_capacity(selected.len());
        for (order, tx_id) in selected {
            let view = self.store.transaction_view(tx_id).await?.ok_or_else(|| {
                query_failure(IndexerError::Storage(format!("transaction {tx_id} is not stored")))
            })?;
            records.push(TransactionRecord {
                hash: view.row.hash,
                sender: decode(&chain.cache, view.row.sender)?,
                receiver: decode(&chain.cache, view.row.receiver)?,
                value: view.row.amount,
                timestamp: view.timestamp,
                block_hash: view.block_hash,
                block_height: self.external_height(chain, &view.block_hash)?,
                order: Some(order),
            });
        }
        Ok(records)
    }

    /// Like [`history`](Self::history), over transfers of one registered token.
    pub async fn token_history(
        &self,
        token_name: &str,
        addresses: &[String],
        max_count: usize,
        oldest_first: bool,
    ) -> Result<Vec<TransactionRecord>, IndexerError> {
        let state = self.read_state().await?;
        let chain = &state.chain;
        let token = chain
            .tokens
            .iter()
            .find(|t| t.name == token_name)
            .ok_or_else(|| IndexerError::Config(format!("unknown token '{token_name}'")))?;

        let mut tx_ids = BTreeSet::new();
        for address in addresses {
            if let Some(id) = chain.cache.encode_if_present(address) {
                tx_ids.extend(
                    self.store
                        .token_transaction_ids_for_address(token.id, id)
                        .await?,
                );
            }
        }
        let selected = select(&chain.order, tx_ids, max_count, oldest_first)?;

        let mut records = Vec::with_capacity(selected.len());
        for (order, tx_id) in selected {
            let missing =
                || query_failure(IndexerError::Storage(format!("token transaction {tx_id} is not stored")));
            let annotation = self.store.token_transaction(tx_id).await?.ok_or_else(missing)?;
            let view = self.store.transaction_view(tx_id).await?.ok_or_else(missing)?;
            records.push(TransactionRecord {
                hash: view.row.hash,
                sender: decode(&chain.cache, annotation.sender)?,
                receiver: decode(&chain.cache, annotation.receiver)?,
                value: annotation.amount,
                timestamp: view.timestamp,
                block_hash: view.block_hash,
                block_height: self.external_height(chain, &view.block_hash)?,
                order: Some(order),
            });
        }
        Ok(records)
    }

    /// Mean of the per-block average gas prices over the last `fee_window`
    /// canonical blocks. Empty blocks are skipped.
    pub async fn fee_estimate(&self) -> Result<Option<String>, IndexerError> {
        let state = self.read_state().await?;
        let tracker = &state.chain.tracker;
        let len = tracker.len() as u64;
        let start = len.saturating_sub(self.config.fee_window);

        let mut total = U256::ZERO;
        let mut samples = 0u64;
        for height in start..len {
            let Some(block) = tracker.block_at(height) else {
                continue;
            };
            if let Some(avg) = self.store.average_gas_price(block.storage_id).await? {
                total = total.saturating_add(parse_amount(&avg)?);
                samples += 1;
            }
        }
        if samples == 0 {
            return Ok(None);
        }
        Ok(Some((total / U256::from(samples)).to_string()))
    }

    /// External height of the canonical tip.
    pub async fn indexed_height(&self) -> Result<Option<u64>, IndexerError> {
        let state = self.read_state().await?;
        Ok(state
            .chain
            .tracker
            .tip()
            .map(|b| b.height + self.config.network.height_offset()))
    }

    /// The canonical block at an external height.
    pub async fn block_at_height(&self, height: u64) -> Result<Option<Block>, IndexerError> {
        let state = self.read_state().await?;
        let Some(internal) = height.checked_sub(self.config.network.height_offset()) else {
            return Ok(None);
        };
        Ok(state.chain.tracker.block_at(internal).cloned())
    }

    pub async fn tip_hash(&self) -> Result<Option<BlockHash>, IndexerError> {
        Ok(self.read_state().await?.chain.tracker.tip_hash())
    }

    pub async fn address_id(&self, address: &str) -> Result<Option<AddressId>, IndexerError> {
        Ok(self.read_state().await?.chain.cache.encode_if_present(address))
    }

    pub async fn status(&self) -> Result<IndexStatus, IndexerError> {
        let state = self.read_state().await?;
        let chain = &state.chain;
        let tip = chain.tracker.tip();
        let tip_time = match tip {
            Some(block) => self
                .store
                .block_row(block.storage_id)
                .await?
                .and_then(|row| DateTime::<Utc>::from_timestamp(row.timestamp, 0)),
            None => None,
        };
        Ok(IndexStatus {
            network: self.config.network.to_string(),
            height: tip.map(|b| b.height + self.config.network.height_offset()),
            tip: tip.map(|b| b.hash),
            tip_time,
            addresses: chain.cache.len(),
        })
    }

    fn external_height(&self, chain: &ChainState, hash: &BlockHash) -> Result<u64, IndexerError> {
        chain
            .tracker
            .height_of(hash)
            .map(|h| h + self.config.network.height_offset())
            .ok_or_else(|| {
                query_failure(IndexerError::InvalidChain(format!(
                    "block {hash} is stored but not canonical"
                )))
            })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn load_chain_state(
    config: &IndexConfig,
    store: &dyn IndexStore,
    repair: bool,
) -> Result<ChainState, IndexerError> {
    let cache = rebuild_address_cache(config, store, repair).await?;

    let blocks = store.load_blocks().await?;
    let declared_head = store.declared_head().await?;
    let tracker = InMemoryChainTracker::from_stored(&blocks, declared_head.as_ref())?;
    let order = OrderIndex::from_items(store.load_timestamp_items().await?);

    Ok(ChainState {
        tracker: Box::new(tracker),
        cache,
        order,
        next_tx_id: store.max_transaction_id().await?.map_or(1, |id| id + 1),
        next_block_id: store.max_block_id().await?.map_or(1, |id| id + 1),
        tokens: store.load_tokens().await?,
    })
}

/// Replay the address table. With `repair`, roll the store back to the last
/// id that replays consistently until the replay succeeds.
async fn rebuild_address_cache(
    config: &IndexConfig,
    store: &dyn IndexStore,
    repair: bool,
) -> Result<AddressCache, IndexerError> {
    loop {
        let rows = store.load_addresses().await?;
        match AddressCache::rebuild(config.address_backend, &rows) {
            Ok(cache) => return Ok(cache),
            Err(IndexerError::InconsistentAddressEncoding {
                expected,
                actual,
                last_good: Some(last_good),
            }) if repair => {
                warn!(expected, actual, last_good, "rolling store back to last consistent address");
                if !store.rollback_to_address(last_good).await? {
                    error!(last_good, "rollback removed nothing; address table is corrupt");
                    return Err(IndexerError::InconsistentAddressEncoding {
                        expected,
                        actual,
                        last_good: Some(last_good),
                    });
                }
            }
            Err(e) => {
                error!(error = %e, "address table cannot be rebuilt");
                return Err(e);
            }
        }
    }
}

/// Order the ids by their order keys and keep the first `max_count`.
fn select(
    order: &OrderIndex,
    tx_ids: BTreeSet<TxId>,
    max_count: usize,
    oldest_first: bool,
) -> Result<Vec<(OrderKey, TxId)>, IndexerError> {
    let mut keyed = tx_ids
        .into_iter()
        .map(|id| order.lookup(id).map(|key| (key, id)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_failure)?;
    keyed.sort_unstable();
    if !oldest_first {
        keyed.reverse();
    }
    keyed.truncate(max_count);
    Ok(keyed)
}

fn decode(cache: &AddressCache, id: AddressId) -> Result<String, IndexerError> {
    cache.decode(id).map_err(query_failure)
}

fn query_failure(e: IndexerError) -> IndexerError {
    error!(error = %e, "query failed on an internal lookup");
    e
}

fn parse_amount(s: &str) -> Result<U256, IndexerError> {
    U256::from_str_radix(s, 10).map_err(|e| IndexerError::Other(format!("invalid amount '{s}': {e}")))
}

/// Integer mean of the gas prices; `None` for an empty block.
fn mean_gas_price(txs: &[IngestTransaction]) -> Result<Option<String>, IndexerError> {
    if txs.is_empty() {
        return Ok(None);
    }
    let mut total = U256::ZERO;
    for t in txs {
        total = total.saturating_add(parse_amount(&t.gas_price)?);
    }
    Ok(Some((total / U256::from(txs.len() as u64)).to_string()))
}
