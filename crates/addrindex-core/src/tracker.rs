//! Chain tracker: holds the canonical chain in memory, detects forks and
//! computes which blocks to revert before a new block can attach.
//!
//! The tracker never touches storage. The coordinator deletes rows for
//! reverted blocks and persists the declared head; the tracker only keeps
//! its in-memory view consistent with that.

use std::collections::HashMap;

use tracing::debug;

use crate::error::IndexerError;
use crate::types::{Block, BlockHash, ChainReorganization, RevertBlock, StorageId};

/// Chain tracking capability. The coordinator depends only on this trait, so
/// a faster implementation can be swapped in at construction time.
pub trait ChainTracker: Send + Sync {
    /// Work out where a block whose parent is `previous_hash` would attach.
    fn probe(&self, previous_hash: &BlockHash) -> ChainReorganization;

    /// Attach a block, truncating any blocks above the attach point.
    /// Returns the new block's height.
    ///
    /// Calling this for a block whose parent is unknown is misuse.
    fn commit(
        &mut self,
        hash: BlockHash,
        previous_hash: BlockHash,
        storage_id: StorageId,
    ) -> Result<u64, IndexerError>;

    /// Remove the tip. `hash` must be the current tip.
    fn revert_tip(&mut self, hash: &BlockHash) -> Result<(), IndexerError>;

    fn height_of(&self, hash: &BlockHash) -> Option<u64>;

    fn block_at(&self, height: u64) -> Option<&Block>;

    fn block_by_hash(&self, hash: &BlockHash) -> Option<&Block>;

    fn tip(&self) -> Option<&Block>;

    fn len(&self) -> usize;

    fn tip_hash(&self) -> Option<BlockHash> {
        self.tip().map(|b| b.hash)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block row as read back from the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub storage_id: StorageId,
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
}

/// Reference tracker: a vector indexed by height plus a hash → height map.
#[derive(Debug, Default)]
pub struct InMemoryChainTracker {
    chain: Vec<Block>,
    index: HashMap<BlockHash, usize>,
}

impl InMemoryChainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the canonical chain from persisted block rows.
    pub fn from_stored(
        stored: &[StoredBlock],
        declared_head: Option<&BlockHash>,
    ) -> Result<Self, IndexerError> {
        let chain = assemble_chain(stored, declared_head)?;
        let index = chain
            .iter()
            .enumerate()
            .map(|(height, b)| (b.hash, height))
            .collect();
        Ok(Self { chain, index })
    }
}

impl ChainTracker for InMemoryChainTracker {
    fn probe(&self, previous_hash: &BlockHash) -> ChainReorganization {
        if self.chain.is_empty() {
            return ChainReorganization::Attach {
                height: 0,
                revert: Vec::new(),
            };
        }
        let Some(&parent) = self.index.get(previous_hash) else {
            return ChainReorganization::BlockRequired(*previous_hash);
        };
        let revert = self.chain[parent + 1..]
            .iter()
            .rev()
            .map(|b| RevertBlock {
                hash: b.hash,
                storage_id: b.storage_id,
                height: b.height,
            })
            .collect();
        ChainReorganization::Attach {
            height: parent as u64 + 1,
            revert,
        }
    }

    fn commit(
        &mut self,
        hash: BlockHash,
        previous_hash: BlockHash,
        storage_id: StorageId,
    ) -> Result<u64, IndexerError> {
        let height = match self.probe(&previous_hash) {
            ChainReorganization::BlockRequired(missing) => {
                return Err(IndexerError::misuse(format!(
                    "commit of {hash} before its parent {missing} was applied"
                )));
            }
            ChainReorganization::Attach { height, .. } => height as usize,
        };
        if let Some(&existing) = self.index.get(&hash) {
            if existing < height {
                return Err(IndexerError::misuse(format!(
                    "block {hash} is already an ancestor at height {existing}"
                )));
            }
        }

        for dropped in self.chain.drain(height..) {
            self.index.remove(&dropped.hash);
        }
        let previous_storage_id = height.checked_sub(1).map(|p| self.chain[p].storage_id);
        self.chain.push(Block {
            hash,
            previous_hash,
            height: height as u64,
            storage_id,
            previous_storage_id,
        });
        self.index.insert(hash, height);
        debug!(%hash, height, storage_id, "block committed to tracker");
        Ok(height as u64)
    }

    fn revert_tip(&mut self, hash: &BlockHash) -> Result<(), IndexerError> {
        match self.chain.last() {
            None => Err(IndexerError::misuse(format!(
                "cannot revert {hash} from an empty chain"
            ))),
            Some(tip) if tip.hash != *hash => Err(IndexerError::misuse(format!(
                "cannot revert {hash}: tip is {}",
                tip.hash
            ))),
            Some(_) => {
                self.chain.pop();
                self.index.remove(hash);
                debug!(%hash, "tip reverted");
                Ok(())
            }
        }
    }

    fn height_of(&self, hash: &BlockHash) -> Option<u64> {
        self.index.get(hash).map(|&h| h as u64)
    }

    fn block_at(&self, height: u64) -> Option<&Block> {
        usize::try_from(height).ok().and_then(|h| self.chain.get(h))
    }

    fn block_by_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.index.get(hash).map(|&h| &self.chain[h])
    }

    fn tip(&self) -> Option<&Block> {
        self.chain.last()
    }

    fn len(&self) -> usize {
        self.chain.len()
    }
}

/// Assemble the canonical chain from unordered block rows.
///
/// Blocks are linked by previous hash. The head is the only block without
/// children; when several exist, `declared_head` picks one. The chain is the
/// walk from the head back to the first block whose parent is not stored.
pub fn assemble_chain(
    stored: &[StoredBlock],
    declared_head: Option<&BlockHash>,
) -> Result<Vec<Block>, IndexerError> {
    if stored.is_empty() {
        return Ok(Vec::new());
    }

    let mut by_hash = HashMap::with_capacity(stored.len());
    for (i, block) in stored.iter().enumerate() {
        if by_hash.insert(block.hash, i).is_some() {
            return Err(IndexerError::InvalidChain(format!(
                "block {} is stored twice",
                block.hash
            )));
        }
    }

    let parents: Vec<Option<usize>> = stored
        .iter()
        .map(|b| by_hash.get(&b.previous_hash).copied())
        .collect();
    let mut has_child = vec![false; stored.len()];
    for &parent in parents.iter().flatten() {
        has_child[parent] = true;
    }

    let leaves: Vec<usize> = (0..stored.len()).filter(|&i| !has_child[i]).collect();
    let head = match leaves.as_slice() {
        [] => {
            return Err(IndexerError::InvalidChain(
                "every block has a child; the chain is circular".into(),
            ))
        }
        [only] => *only,
        _ => {
            let Some(declared) = declared_head else {
                return Err(IndexerError::AmbiguousHead {
                    leaves: leaves.len(),
                });
            };
            *by_hash.get(declared).ok_or_else(|| {
                IndexerError::InvalidChain(format!(
                    "declared head {declared} is not a stored block"
                ))
            })?
        }
    };

    let mut path = Vec::new();
    let mut current = Some(head);
    while let Some(i) = current {
        if path.len() == stored.len() {
            return Err(IndexerError::InvalidChain(
                "previous-hash links form a cycle".into(),
            ));
        }
        path.push(i);
        current = parents[i];
    }
    path.reverse();

    let mut chain: Vec<Block> = Vec::with_capacity(path.len());
    for (height, &i) in path.iter().enumerate() {
        let row = &stored[i];
        chain.push(Block {
            hash: row.hash,
            previous_hash: row.previous_hash,
            height: height as u64,
            storage_id: row.storage_id,
            previous_storage_id: chain.last().map(|b| b.storage_id),
        });
    }
    debug!(
        stored = stored.len(),
        canonical = chain.len(),
        heads = leaves.len(),
        "canonical chain assembled"
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn h(n: u8) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        bytes[0] = 0xbb;
        Hash256::new(bytes)
    }

    fn stored(id: StorageId, hash: u8, prev: u8) -> StoredBlock {
        StoredBlock {
            storage_id: id,
            hash: h(hash),
            previous_hash: h(prev),
        }
    }

    /// Builds `[1@0, 2@1, ..., n@n-1]`, storage ids equal to the hash byte.
    fn linear(n: u8) -> InMemoryChainTracker {
        let mut t = InMemoryChainTracker::new();
        for i in 1..=n {
            t.commit(h(i), h(i - 1), i as u64).unwrap();
        }
        t
    }

    #[test]
    fn empty_chain_attaches_at_zero() {
        let t = InMemoryChainTracker::new();
        assert_eq!(
            t.probe(&h(42)),
            ChainReorganization::Attach { height: 0, revert: vec![] }
        );
        assert!(t.tip_hash().is_none());
    }

    #[test]
    fn unknown_parent_requires_block() {
        let t = linear(3);
        assert_eq!(t.probe(&h(99)).block_required(), Some(&h(99)));
    }

    #[test]
    fn probe_lists_reverts_tip_first() {
        // [A@0, B@1, C@2]; a sibling of B reverts C then B.
        let t = linear(3);
        let reorg = t.probe(&h(1));
        assert_eq!(reorg.attach_height(), Some(1));
        let reverted: Vec<_> = reorg.blocks_to_revert().iter().map(|b| b.hash).collect();
        assert_eq!(reverted, vec![h(3), h(2)]);
        assert_eq!(reorg.blocks_to_revert()[0].height, 2);
        assert_eq!(reorg.blocks_to_revert()[1].storage_id, 2);
    }

    #[test]
    fn commit_on_fork_truncates() {
        let mut t = linear(3);
        let height = t.commit(h(4), h(1), 40).unwrap();
        assert_eq!(height, 1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.tip_hash(), Some(h(4)));
        assert!(t.block_by_hash(&h(2)).is_none());
        assert!(t.block_by_hash(&h(3)).is_none());
        let tip = t.tip().unwrap();
        assert_eq!(tip.previous_storage_id, Some(1));
    }

    #[test]
    fn commit_without_parent_is_misuse() {
        let mut t = linear(2);
        let err = t.commit(h(9), h(8), 9).unwrap_err();
        assert!(matches!(err, IndexerError::ChainMisuse(_)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn commit_of_existing_ancestor_is_misuse() {
        let mut t = linear(3);
        // h(1) is the root; re-attaching it above h(2) would create a cycle.
        let err = t.commit(h(1), h(2), 11).unwrap_err();
        assert!(matches!(err, IndexerError::ChainMisuse(_)));
        assert_eq!(t.tip_hash(), Some(h(3)));
    }

    #[test]
    fn heights_match_lookups_after_mixed_operations() {
        let mut t = linear(5);
        t.revert_tip(&h(5)).unwrap();
        t.commit(h(20), h(2), 20).unwrap();
        t.commit(h(21), h(20), 21).unwrap();
        t.revert_tip(&h(21)).unwrap();
        t.commit(h(22), h(20), 22).unwrap();

        for height in 0..t.len() as u64 {
            let block = t.block_at(height).unwrap();
            assert_eq!(t.height_of(&block.hash), Some(height));
            assert_eq!(t.block_by_hash(&block.hash).unwrap().height, height);
        }
        assert_eq!(t.tip_hash(), Some(h(22)));
    }

    #[test]
    fn probe_then_commit_never_requires_block() {
        let mut t = linear(4);
        for (hash, prev) in [(30, 2), (31, 30), (32, 4), (33, 31)] {
            let reorg = t.probe(&h(prev));
            if reorg.block_required().is_some() {
                continue;
            }
            t.commit(h(hash), h(prev), hash as u64).unwrap();
        }
        assert_eq!(t.tip_hash(), Some(h(33)));
    }

    #[test]
    fn revert_then_recommit_reproduces_chain() {
        let mut t = linear(4);
        let before: Vec<_> = (0..4).map(|i| t.block_at(i).unwrap().clone()).collect();
        for b in before.iter().rev() {
            t.revert_tip(&b.hash).unwrap();
        }
        assert!(t.is_empty());
        for b in &before {
            t.commit(b.hash, b.previous_hash, b.storage_id).unwrap();
        }
        let after: Vec<_> = (0..4).map(|i| t.block_at(i).unwrap().clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn revert_misuse_is_rejected() {
        let mut empty = InMemoryChainTracker::new();
        assert!(matches!(
            empty.revert_tip(&h(1)),
            Err(IndexerError::ChainMisuse(_))
        ));

        let mut t = linear(3);
        assert!(matches!(
            t.revert_tip(&h(2)),
            Err(IndexerError::ChainMisuse(_))
        ));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn assemble_single_leaf() {
        // Rows deliberately out of order.
        let rows = vec![stored(3, 3, 2), stored(1, 1, 0), stored(2, 2, 1)];
        let t = InMemoryChainTracker::from_stored(&rows, None).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.tip_hash(), Some(h(3)));
        assert_eq!(t.block_at(0).unwrap().previous_storage_id, None);
        assert_eq!(t.block_at(2).unwrap().previous_storage_id, Some(2));
    }

    #[test]
    fn assemble_uses_declared_head_for_forks() {
        let rows = vec![
            stored(1, 1, 0),
            stored(2, 2, 1),
            stored(3, 3, 2),
            stored(4, 4, 1),
        ];
        let t = InMemoryChainTracker::from_stored(&rows, Some(&h(4))).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.tip_hash(), Some(h(4)));

        let err = InMemoryChainTracker::from_stored(&rows, None).unwrap_err();
        assert!(matches!(err, IndexerError::AmbiguousHead { leaves: 2 }));

        let err = InMemoryChainTracker::from_stored(&rows, Some(&h(77))).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidChain(_)));
    }

    #[test]
    fn assemble_rejects_cycles() {
        let rows = vec![stored(1, 1, 2), stored(2, 2, 1)];
        let err = InMemoryChainTracker::from_stored(&rows, None).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidChain(_)));
    }
}
