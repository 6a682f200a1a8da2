//! Scripted in-memory node for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use addrindex_core::{BlockHash, Hash256, IndexerError, TxHash};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fetcher::EvmRpcClient;

pub(crate) const MINER: &str = "0x00000000000000000000000000000000000000aa";

/// Hash for block or transaction `n` on branch `branch`.
pub(crate) fn h(branch: u8, n: u64) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[0] = branch;
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    Hash256::new(bytes)
}

pub(crate) fn block_json(
    number: u64,
    hash: BlockHash,
    parent: BlockHash,
    timestamp: u64,
    transactions: Vec<Value>,
) -> Value {
    json!({
        "number": format!("{number:#x}"),
        "hash": hash.to_hex(),
        "parentHash": parent.to_hex(),
        "timestamp": format!("{timestamp:#x}"),
        "miner": MINER,
        "transactions": transactions,
    })
}

pub(crate) fn tx_json(
    hash: TxHash,
    from: Option<&str>,
    to: Option<&str>,
    value: &str,
    input: &str,
) -> Value {
    json!({
        "hash": hash.to_hex(),
        "from": from,
        "to": to,
        "value": value,
        "gasPrice": "0x4a817c800",
        "gas": "0x5208",
        "input": input,
    })
}

pub(crate) fn receipt_json(status: Option<&str>, gas_used: &str) -> Value {
    let mut receipt = json!({
        "contractAddress": null,
        "gasUsed": gas_used,
        "logs": [],
    });
    if let Some(status) = status {
        receipt["status"] = json!(status);
    }
    receipt
}

#[derive(Default)]
struct MockState {
    head: u64,
    by_number: HashMap<u64, Value>,
    by_hash: HashMap<BlockHash, Value>,
    receipts: HashMap<TxHash, Value>,
    failures: u32,
}

/// Cloneable handle onto a shared scripted chain.
#[derive(Clone, Default)]
pub(crate) struct MockClient {
    state: Arc<Mutex<MockState>>,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serve `block` by number and hash. The head follows the highest
    /// number pushed; a later push at the same number replaces the
    /// canonical block (the old one stays reachable by hash).
    pub(crate) fn push_block(&self, block: Value) {
        let mut state = self.state.lock().unwrap();
        let number = block["number"]
            .as_str()
            .and_then(|n| u64::from_str_radix(n.trim_start_matches("0x"), 16).ok())
            .unwrap();
        let hash = Hash256::from_hex(block["hash"].as_str().unwrap()).unwrap();
        state.head = state.head.max(number);
        state.by_hash.insert(hash, block.clone());
        state.by_number.insert(number, block);
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub(crate) fn add_receipt(&self, hash: TxHash, receipt: Value) {
        self.state.lock().unwrap().receipts.insert(hash, receipt);
    }

    /// Make the next `n` calls fail with a transport error.
    pub(crate) fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().failures = n;
    }

    pub(crate) fn failures_left(&self) -> u32 {
        self.state.lock().unwrap().failures
    }

    fn with<T>(&self, f: impl FnOnce(&MockState) -> T) -> Result<T, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(IndexerError::Rpc("connection refused".into()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl EvmRpcClient for MockClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        self.with(|s| s.head)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Value>, IndexerError> {
        self.with(|s| {
            if number > s.head {
                None
            } else {
                s.by_number.get(&number).cloned()
            }
        })
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Value>, IndexerError> {
        self.with(|s| s.by_hash.get(hash).cloned())
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Value>, IndexerError> {
        self.with(|s| s.receipts.get(tx_hash).cloned())
    }
}
