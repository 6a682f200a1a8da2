//! EVM block fetcher: turns node JSON into `IngestBlock`s.
//!
//! The node is reached through the [`EvmRpcClient`] trait so the index loop
//! can be driven by the HTTP client in production and by a scripted client
//! in tests. Quantities arrive as `0x`-prefixed hex and are rendered as
//! decimal strings; call data is decoded to raw bytes.

use std::str::FromStr;

use addrindex_core::{
    BlockHash, IndexerError, IngestBlock, IngestTransaction, Network, Receipt, TxHash,
};
use alloy_primitives::U256;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;

use crate::retry::RetryPolicy;

/// Minimal EVM JSON-RPC surface the indexer needs.
///
/// `Ok(None)` means the node answered `null`. Transport failures are
/// reported as [`IndexerError::Rpc`] so the fetcher can retry them.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// `eth_blockNumber`
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// `eth_getBlockByNumber` with full transaction objects.
    async fn block_by_number(&self, number: u64) -> Result<Option<Value>, IndexerError>;

    /// `eth_getBlockByHash` with full transaction objects.
    async fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Value>, IndexerError>;

    /// `eth_getTransactionReceipt`
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Value>, IndexerError>;
}

// ─── Fetcher ─────────────────────────────────────────────────────────────────

/// Fetches complete blocks (transactions plus receipts), retrying transient
/// node failures with exponential backoff.
pub struct BlockFetcher<C> {
    client: C,
    network: Network,
    retry: RetryPolicy,
}

impl<C: EvmRpcClient> BlockFetcher<C> {
    pub fn new(client: C, network: Network, retry: RetryPolicy) -> Self {
        Self {
            client,
            network,
            retry,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn head_block_number(&self) -> Result<u64, IndexerError> {
        let client = &self.client;
        self.retry
            .run("eth_blockNumber", move || client.block_number())
            .await
    }

    /// Fetch the block at `number`. A block the node does not have yet is
    /// treated as transient.
    pub async fn block(&self, number: u64) -> Result<IngestBlock, IndexerError> {
        let client = &self.client;
        let raw = self
            .retry
            .run("eth_getBlockByNumber", move || async move {
                client
                    .block_by_number(number)
                    .await?
                    .ok_or_else(|| IndexerError::Rpc(format!("block {number} not available")))
            })
            .await?;
        self.complete(&raw).await
    }

    pub async fn block_by_hash(&self, hash: &BlockHash) -> Result<IngestBlock, IndexerError> {
        let client = &self.client;
        let raw = self
            .retry
            .run("eth_getBlockByHash", move || async move {
                client
                    .block_by_hash(hash)
                    .await?
                    .ok_or_else(|| IndexerError::Rpc(format!("block {hash} not available")))
            })
            .await?;
        let block = self.complete(&raw).await?;
        if block.hash != *hash {
            return Err(IndexerError::Other(format!(
                "node returned block {} when asked for {hash}",
                block.hash
            )));
        }
        Ok(block)
    }

    async fn complete(&self, raw: &Value) -> Result<IngestBlock, IndexerError> {
        let mut block = block_from_json(raw)?;
        let receipts = try_join_all(block.transactions.iter().map(|tx| self.receipt(tx.hash))).await?;
        for (tx, receipt) in block.transactions.iter_mut().zip(receipts) {
            tx.receipt = receipt;
        }
        tracing::debug!(
            number = block.number,
            hash = %block.hash,
            transactions = block.transactions.len(),
            "fetched block"
        );
        Ok(block)
    }

    /// Ethereum-family nodes always serve receipts for mined transactions, so
    /// a missing one is a lagging node and gets retried. RSK may legitimately
    /// have none.
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, IndexerError> {
        let client = &self.client;
        let required = self.network.is_ethereum();
        let raw = self
            .retry
            .run("eth_getTransactionReceipt", move || async move {
                match client.receipt(&tx_hash).await? {
                    None if required => Err(IndexerError::Rpc(format!(
                        "receipt for {tx_hash} not available"
                    ))),
                    other => Ok(other),
                }
            })
            .await?;
        raw.as_ref().map(receipt_from_json).transpose()
    }
}

// ─── JSON decoding ───────────────────────────────────────────────────────────

/// Parse a `0x`-prefixed hex quantity. `"0x"` is read as zero.
pub fn parse_quantity(s: &str) -> Option<U256> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

fn malformed(what: &str, key: &str) -> IndexerError {
    IndexerError::Other(format!("malformed {what}: bad or missing `{key}`"))
}

fn str_field<'a>(v: &'a Value, key: &str, what: &str) -> Result<&'a str, IndexerError> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(what, key))
}

fn opt_str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn u64_field(v: &Value, key: &str, what: &str) -> Result<u64, IndexerError> {
    let raw = str_field(v, key, what)?;
    raw.strip_prefix("0x")
        .and_then(|digits| u64::from_str_radix(digits, 16).ok())
        .ok_or_else(|| malformed(what, key))
}

fn decimal_field(v: &Value, key: &str, what: &str) -> Result<String, IndexerError> {
    parse_quantity(str_field(v, key, what)?)
        .map(|n| n.to_string())
        .ok_or_else(|| malformed(what, key))
}

fn hash_field(v: &Value, key: &str, what: &str) -> Result<BlockHash, IndexerError> {
    BlockHash::from_str(str_field(v, key, what)?).map_err(|_| malformed(what, key))
}

/// Decode a block fetched with full transaction objects. Receipts are left
/// empty.
pub fn block_from_json(v: &Value) -> Result<IngestBlock, IndexerError> {
    const WHAT: &str = "block";
    let timestamp = u64_field(v, "timestamp", WHAT)?;
    let transactions = v
        .get("transactions")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(WHAT, "transactions"))?
        .iter()
        .map(transaction_from_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(IngestBlock {
        number: u64_field(v, "number", WHAT)?,
        hash: hash_field(v, "hash", WHAT)?,
        parent_hash: hash_field(v, "parentHash", WHAT)?,
        timestamp: i64::try_from(timestamp).map_err(|_| malformed(WHAT, "timestamp"))?,
        miner: str_field(v, "miner", WHAT)?.to_owned(),
        transactions,
    })
}

fn transaction_from_json(v: &Value) -> Result<IngestTransaction, IndexerError> {
    const WHAT: &str = "transaction";
    let input = str_field(v, "input", WHAT)?;
    let input = hex::decode(input.strip_prefix("0x").unwrap_or(input))
        .map_err(|_| malformed(WHAT, "input"))?;
    Ok(IngestTransaction {
        hash: hash_field(v, "hash", WHAT)?,
        from: opt_str_field(v, "from"),
        to: opt_str_field(v, "to"),
        value: decimal_field(v, "value", WHAT)?,
        gas_price: decimal_field(v, "gasPrice", WHAT)?,
        gas_limit: decimal_field(v, "gas", WHAT)?,
        input,
        receipt: None,
    })
}

/// Decode a transaction receipt. `status` is optional: pre-Byzantium
/// Ethereum receipts and some RSK nodes omit it.
pub fn receipt_from_json(v: &Value) -> Result<Receipt, IndexerError> {
    const WHAT: &str = "receipt";
    let status = match v.get("status") {
        None | Some(Value::Null) => None,
        Some(_) => Some(
            parse_quantity(str_field(v, "status", WHAT)?)
                .ok_or_else(|| malformed(WHAT, "status"))?
                != U256::ZERO,
        ),
    };
    Ok(Receipt {
        contract_address: opt_str_field(v, "contractAddress"),
        gas_used: decimal_field(v, "gasUsed", WHAT)?,
        status,
        logs: v
            .get("logs")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{block_json, h, receipt_json, tx_json, MockClient};
    use addrindex_core::RetrySettings;
    use serde_json::json;

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(&RetrySettings {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 2.0,
        })
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x0"), Some(U256::ZERO));
        assert_eq!(parse_quantity("0x"), Some(U256::ZERO));
        assert_eq!(parse_quantity("0xff"), Some(U256::from(255u64)));
        assert_eq!(parse_quantity("ff"), None);
        assert_eq!(parse_quantity("0xzz"), None);
        let wei = parse_quantity("0xde0b6b3a7640000").unwrap();
        assert_eq!(wei.to_string(), "1000000000000000000");
    }

    #[test]
    fn decodes_block_with_transactions() {
        let raw = block_json(
            0x10,
            h(0, 0x10),
            h(0, 0x0f),
            0x5f5e100,
            vec![tx_json(h(9, 1), Some("0xAbC0000000000000000000000000000000000001"), None, "0xde0b6b3a7640000", "0xa9059cbb")],
        );
        let block = block_from_json(&raw).unwrap();
        assert_eq!(block.number, 16);
        assert_eq!(block.hash, h(0, 0x10));
        assert_eq!(block.parent_hash, h(0, 0x0f));
        assert_eq!(block.timestamp, 100_000_000);
        let tx = &block.transactions[0];
        assert_eq!(tx.from.as_deref(), Some("0xAbC0000000000000000000000000000000000001"));
        assert_eq!(tx.to, None);
        assert_eq!(tx.value, "1000000000000000000");
        assert_eq!(tx.gas_price, "20000000000");
        assert_eq!(tx.gas_limit, "21000");
        assert_eq!(tx.input, vec![0xa9, 0x05, 0x9c, 0xbb]);
        assert!(tx.receipt.is_none());
    }

    #[test]
    fn rejects_hash_only_transactions() {
        let mut raw = block_json(1, h(0, 1), h(0, 0), 1, vec![]);
        raw["transactions"] = json!([h(9, 1).to_hex()]);
        assert!(matches!(block_from_json(&raw), Err(IndexerError::Other(_))));
    }

    #[test]
    fn receipt_status_is_optional() {
        let ok = receipt_from_json(&receipt_json(Some("0x1"), "0x5208")).unwrap();
        assert_eq!(ok.status, Some(true));
        assert_eq!(ok.gas_used, "21000");
        let failed = receipt_from_json(&receipt_json(Some("0x0"), "0x5208")).unwrap();
        assert_eq!(failed.status, Some(false));
        let legacy = receipt_from_json(&receipt_json(None, "0x5208")).unwrap();
        assert_eq!(legacy.status, None);
        assert!(!legacy.has_logs());
    }

    #[tokio::test]
    async fn fetches_receipts_for_every_transaction() {
        let client = MockClient::new();
        client.push_block(block_json(
            0,
            h(0, 0),
            h(0xff, 0),
            1,
            vec![
                tx_json(h(9, 1), Some("0x01"), Some("0x02"), "0x1", "0x"),
                tx_json(h(9, 2), Some("0x02"), Some("0x03"), "0x2", "0x"),
            ],
        ));
        client.add_receipt(h(9, 1), receipt_json(Some("0x1"), "0x5208"));
        client.add_receipt(h(9, 2), receipt_json(Some("0x0"), "0x5208"));

        let fetcher = BlockFetcher::new(client, Network::Ethereum, fast_retry(1));
        let block = fetcher.block(0).await.unwrap();
        let statuses: Vec<_> = block
            .transactions
            .iter()
            .map(|tx| tx.receipt.as_ref().and_then(|r| r.status))
            .collect();
        assert_eq!(statuses, vec![Some(true), Some(false)]);
    }

    #[tokio::test]
    async fn missing_ethereum_receipt_is_transient() {
        let client = MockClient::new();
        client.push_block(block_json(
            0,
            h(0, 0),
            h(0xff, 0),
            1,
            vec![tx_json(h(9, 1), Some("0x01"), Some("0x02"), "0x1", "0x")],
        ));
        let fetcher = BlockFetcher::new(client.clone(), Network::Ethereum, fast_retry(2));
        let err = fetcher.block(0).await.unwrap_err();
        assert!(matches!(err, IndexerError::RetriesExhausted { attempts: 3, .. }));

        let fetcher = BlockFetcher::new(client, Network::Rsk, fast_retry(2));
        let block = fetcher.block(0).await.unwrap();
        assert!(block.transactions[0].receipt.is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let client = MockClient::new();
        client.push_block(block_json(7, h(0, 7), h(0, 6), 1, vec![]));
        client.fail_next(2);
        let fetcher = BlockFetcher::new(client.clone(), Network::Ethereum, fast_retry(3));
        assert_eq!(fetcher.head_block_number().await.unwrap(), 7);
        assert_eq!(client.failures_left(), 0);
    }

    #[tokio::test]
    async fn unknown_block_exhausts_retries() {
        let fetcher = BlockFetcher::new(MockClient::new(), Network::Ethereum, fast_retry(1));
        let err = fetcher.block(42).await.unwrap_err();
        match err {
            IndexerError::RetriesExhausted { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("block 42 not available"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn block_by_hash_checks_the_answer() {
        let client = MockClient::new();
        client.push_block(block_json(3, h(1, 3), h(1, 2), 1, vec![]));
        let fetcher = BlockFetcher::new(client, Network::Ethereum, fast_retry(0));
        let block = fetcher.block_by_hash(&h(1, 3)).await.unwrap();
        assert_eq!(block.number, 3);
        assert!(fetcher.block_by_hash(&h(2, 3)).await.is_err());
    }
}
