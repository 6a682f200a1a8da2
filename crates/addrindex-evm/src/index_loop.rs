//! The main index loop: orchestrates initial sync and live polling.
//!
//! # Phase 1: INITIAL SYNC
//! Fetch blocks from the indexed tip up to `head - initial_sync_lag`,
//! buffering them and committing through `ingest_batch` whenever the buffer
//! holds `batch_max_transactions` transactions.
//!
//! # Phase 2: LIVE
//! Every `poll_interval_ms`, ingest each new block up to
//! `head - confirmation_depth`, one block per transaction.
//!
//! In both phases a block whose parent is unknown triggers gap filling: the
//! missing ancestor is fetched by hash and ingested first, repeatedly, up to
//! `max_gap_fill_depth` ancestors. That is also how forks are followed.
//!
//! The stop signal is checked before each block. A block that was handed to
//! the coordinator is either fully committed or fully rolled back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use addrindex_core::{IndexConfig, IndexCoordinator, IndexerError, IngestBlock, IngestOutcome};
use tokio::sync::watch;

use crate::fetcher::{BlockFetcher, EvmRpcClient};
use crate::retry::RetryPolicy;

/// Lifecycle of an [`IndexLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    InitialSync,
    Live,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::InitialSync => "initial_sync",
            Self::Live => "live",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub struct IndexLoop<C: EvmRpcClient> {
    config: IndexConfig,
    coordinator: Arc<IndexCoordinator>,
    fetcher: BlockFetcher<C>,
    stop: watch::Receiver<bool>,
    state: LoopState,
}

impl<C: EvmRpcClient> IndexLoop<C> {
    /// The loop runs until `stop` carries `true` or its sender is dropped.
    pub fn new(coordinator: Arc<IndexCoordinator>, client: C, stop: watch::Receiver<bool>) -> Self {
        let config = coordinator.config().clone();
        let fetcher = BlockFetcher::new(client, config.network, RetryPolicy::new(&config.retry));
        Self {
            config,
            coordinator,
            fetcher,
            stop,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn coordinator(&self) -> &Arc<IndexCoordinator> {
        &self.coordinator
    }

    /// Run initial sync, then poll until stopped. Errors that survive the
    /// fetcher's retries end the loop.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        self.state = LoopState::InitialSync;
        let synced = self.initial_sync().await?;
        tracing::info!(blocks = synced, "Initial sync complete");

        self.state = LoopState::Live;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        while !self.stop_requested() {
            self.poll_once().await?;
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state = LoopState::Stopped;
        let height = self.coordinator.indexed_height().await.ok().flatten();
        tracing::info!(?height, "Index loop stopped");
        Ok(())
    }

    /// Catch up to `head - initial_sync_lag` in large batches. Returns the
    /// number of blocks committed.
    pub async fn initial_sync(&mut self) -> Result<usize, IndexerError> {
        let head = self.fetcher.head_block_number().await?;
        let target = head.saturating_sub(self.config.initial_sync_lag);
        let mut next = self.next_number().await?;
        tracing::info!(from = next, target, head, "Starting initial sync");

        let mut committed = 0usize;
        let mut buffer = Vec::new();
        let mut buffered_txs = 0usize;
        while next <= target && !self.stop_requested() {
            let block = self.fetcher.block(next).await?;
            buffered_txs += block.transactions.len();
            buffer.push(block);
            if buffered_txs >= self.config.batch_max_transactions {
                committed += self.flush(&mut buffer).await?;
                buffered_txs = 0;
            }
            next += 1;
        }
        committed += self.flush(&mut buffer).await?;
        Ok(committed)
    }

    /// Ingest every new block up to `head - confirmation_depth`. Returns the
    /// number of blocks committed, gap-filled ancestors included.
    pub async fn poll_once(&mut self) -> Result<usize, IndexerError> {
        let head = self.fetcher.head_block_number().await?;
        let target = head.saturating_sub(self.config.confirmation_depth);
        let mut next = self.next_number().await?;
        let mut committed = 0usize;
        while next <= target && !self.stop_requested() {
            let block = self.fetcher.block(next).await?;
            committed += self.ingest_with_gap_fill(block).await?;
            next = self.next_number().await?;
        }
        Ok(committed)
    }

    async fn flush(&self, buffer: &mut Vec<IngestBlock>) -> Result<usize, IndexerError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let blocks = std::mem::take(buffer);
        let outcome = self.coordinator.ingest_batch(&blocks).await?;
        let mut committed = outcome.committed();
        let height = self.coordinator.indexed_height().await.ok().flatten();
        tracing::info!(blocks = blocks.len(), committed, ?height, "Batch committed");

        if let Some(missing) = outcome.block_required {
            tracing::warn!(%missing, "Parent unknown during initial sync, filling gap");
            for block in blocks.into_iter().skip(outcome.applied.len()) {
                if self.stop_requested() {
                    break;
                }
                committed += self.ingest_with_gap_fill(block).await?;
            }
        }
        Ok(committed)
    }

    /// Ingest `block`, fetching unknown ancestors by hash first.
    async fn ingest_with_gap_fill(&self, block: IngestBlock) -> Result<usize, IndexerError> {
        let mut pending = vec![block];
        let mut fetched = 0usize;
        let mut committed = 0usize;

        while let Some(top) = pending.last() {
            match self.coordinator.ingest(top).await? {
                IngestOutcome::BlockRequired(missing) => {
                    if fetched >= self.config.max_gap_fill_depth {
                        return Err(IndexerError::Aborted {
                            reason: format!(
                                "no common ancestor within {} blocks of {}",
                                self.config.max_gap_fill_depth, top.hash
                            ),
                        });
                    }
                    tracing::debug!(block = %top.hash, %missing, "Fetching missing ancestor");
                    pending.push(self.fetcher.block_by_hash(&missing).await?);
                    fetched += 1;
                }
                IngestOutcome::Committed {
                    height, reverted, ..
                } => {
                    if reverted > 0 {
                        tracing::warn!(reverted, height, block = %top.hash, "Chain reorganized");
                    } else {
                        tracing::debug!(height, block = %top.hash, "Block committed");
                    }
                    committed += 1;
                    pending.pop();
                }
                IngestOutcome::AlreadyIndexed { height } => {
                    tracing::debug!(height, block = %top.hash, "Block already indexed");
                    pending.pop();
                }
            }
        }
        Ok(committed)
    }

    /// Node number of the block after the indexed tip. Stale coordinator
    /// state is reloaded first.
    async fn next_number(&self) -> Result<u64, IndexerError> {
        let height = match self.coordinator.indexed_height().await {
            Err(IndexerError::StaleState) => {
                tracing::warn!("Coordinator state is stale, reloading from store");
                self.coordinator.reload().await?;
                self.coordinator.indexed_height().await?
            }
            other => other?,
        };
        Ok(match height {
            Some(height) => height + 1,
            None => self.config.network.height_offset(),
        })
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }
}
