//! HTTP JSON-RPC client backed by `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use addrindex_core::{BlockHash, IndexerError, TxHash};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fetcher::EvmRpcClient;

/// Plain JSON-RPC over HTTP. Retries live in
/// [`BlockFetcher`](crate::fetcher::BlockFetcher), not here.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with a 30 second request timeout.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, Duration::from_secs(30))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and return its `result` (possibly `null`).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("{method}: HTTP {status}: {text}")));
        }

        let mut envelope: Value = resp
            .json()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: invalid response: {e}")))?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(IndexerError::Rpc(format!("{method}: node error: {err}")));
        }
        Ok(envelope
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

fn non_null(v: Value) -> Option<Value> {
    (!v.is_null()).then_some(v)
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        result
            .as_str()
            .and_then(|s| s.strip_prefix("0x"))
            .and_then(|digits| u64::from_str_radix(digits, 16).ok())
            .ok_or_else(|| IndexerError::Rpc(format!("eth_blockNumber: unexpected result {result}")))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Value>, IndexerError> {
        self.call("eth_getBlockByNumber", json!([format!("{number:#x}"), true]))
            .await
            .map(non_null)
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Value>, IndexerError> {
        self.call("eth_getBlockByHash", json!([hash.to_hex(), true]))
            .await
            .map(non_null)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Value>, IndexerError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash.to_hex()]))
            .await
            .map(non_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_endpoint() {
        let client = HttpRpcClient::default_for("http://localhost:4444").unwrap();
        assert_eq!(client.url(), "http://localhost:4444");
    }

    #[tokio::test]
    async fn unreachable_node_is_a_transient_error() {
        // Port 9 (discard) on loopback is not expected to speak HTTP.
        let client = HttpRpcClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.block_number().await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
