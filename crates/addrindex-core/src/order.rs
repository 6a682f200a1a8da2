//! Chronological ordering of transactions without a per-row sort column.
//!
//! Every block owns the contiguous id range `[tx_begin, tx_end)`. The order
//! key of a transaction is its block's timestamp plus its offset inside the
//! range.

use tracing::debug;

use crate::error::IndexerError;
use crate::types::{OrderKey, TimestampItem, TxId};

/// Sorted, non-overlapping timestamp ranges.
#[derive(Debug, Clone, Default)]
pub struct OrderIndex {
    items: Vec<TimestampItem>,
}

impl OrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<TimestampItem>) -> Self {
        let mut index = Self::new();
        index.reload(items);
        index
    }

    /// Resolve a committed transaction id to its order key.
    pub fn lookup(&self, tx_id: TxId) -> Result<OrderKey, IndexerError> {
        let candidate = self.items.partition_point(|item| item.tx_end <= tx_id);
        match self.items.get(candidate) {
            Some(item) if item.contains(tx_id) => Ok(OrderKey {
                timestamp: item.timestamp,
                index: u32::try_from(tx_id - item.tx_begin)
                    .map_err(|_| IndexerError::MissingOrderKey { tx_id })?,
            }),
            _ => Err(IndexerError::MissingOrderKey { tx_id }),
        }
    }

    /// Add the range of a block committed at the tip. Empty ranges are
    /// skipped.
    pub fn append_block(&mut self, item: TimestampItem) {
        if item.tx_begin >= item.tx_end {
            return;
        }
        let in_order = self
            .items
            .last()
            .map_or(true, |last| last.tx_end <= item.tx_begin);
        self.items.push(item);
        if !in_order {
            self.items.sort_by_key(|i| i.tx_begin);
        }
    }

    /// Replace every range, e.g. after reverted blocks were deleted.
    pub fn reload(&mut self, mut items: Vec<TimestampItem>) {
        items.retain(|i| i.tx_begin < i.tx_end);
        items.sort_by_key(|i| i.tx_begin);
        debug!(ranges = items.len(), "order index reloaded");
        self.items = items;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
