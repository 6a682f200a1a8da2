//! Address cache: maps address strings to dense integer ids and back.
//!
//! Ids start at 1 and are assigned sequentially; an id, once handed out, is
//! bound to its address for the lifetime of the store. Address identity is
//! case-insensitive: every address is lower-cased before lookup.
//!
//! Two encoders implement the same contract:
//!
//! - [`HashMapEncoder`]: plain map keyed by address strings.
//! - [`PackedEncoder`]: keeps 20-byte hex addresses as fixed binary keys in
//!   a sorted array, with a small staging map merged in periodically.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::config::AddressBackend;
use crate::error::IndexerError;
use crate::store::StoreTransaction;
use crate::types::AddressId;

/// Canonical form of an address used for identity.
pub fn normalize(address: &str) -> String {
    address.to_ascii_lowercase()
}

// ─── Encoders ────────────────────────────────────────────────────────────────

/// Bidirectional id assignment over normalized addresses.
pub trait AddressEncoder: Send + Sync {
    fn lookup(&self, normalized: &str) -> Option<AddressId>;

    /// Bind `normalized` to the next id. The caller has checked `lookup`.
    fn allocate(&mut self, normalized: &str) -> AddressId;

    fn decode(&self, id: AddressId) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reference encoder: a string map plus an id-indexed vector.
#[derive(Debug, Default)]
pub struct HashMapEncoder {
    ids: HashMap<String, AddressId>,
    by_id: Vec<String>,
}

impl AddressEncoder for HashMapEncoder {
    fn lookup(&self, normalized: &str) -> Option<AddressId> {
        self.ids.get(normalized).copied()
    }

    fn allocate(&mut self, normalized: &str) -> AddressId {
        self.by_id.push(normalized.to_string());
        let id = self.by_id.len() as AddressId;
        self.ids.insert(normalized.to_string(), id);
        id
    }

    fn decode(&self, id: AddressId) -> Option<String> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.by_id.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

type PackedAddress = [u8; 20];

#[derive(Debug, Clone)]
enum StoredKey {
    Packed(PackedAddress),
    Text(String),
}

/// Staged keys are merged into the sorted array at this size.
const MERGE_THRESHOLD: usize = 1 << 16;

/// Encoder that stores `0x`-prefixed 20-byte addresses as raw bytes.
#[derive(Debug, Default)]
pub struct PackedEncoder {
    sorted: Vec<(PackedAddress, AddressId)>,
    staging: BTreeMap<PackedAddress, AddressId>,
    fallback: HashMap<String, AddressId>,
    by_id: Vec<StoredKey>,
}

impl PackedEncoder {
    fn pack(normalized: &str) -> Option<PackedAddress> {
        let digits = normalized.strip_prefix("0x")?;
        if digits.len() != 40 {
            return None;
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out).ok()?;
        Some(out)
    }

    fn merge_staging(&mut self) {
        let staged = std::mem::take(&mut self.staging);
        debug!(staged = staged.len(), sorted = self.sorted.len(), "merging packed address keys");
        self.sorted.extend(staged);
        self.sorted.sort_unstable_by_key(|(key, _)| *key);
    }
}

impl AddressEncoder for PackedEncoder {
    fn lookup(&self, normalized: &str) -> Option<AddressId> {
        match Self::pack(normalized) {
            Some(key) => self
                .sorted
                .binary_search_by_key(&key, |(k, _)| *k)
                .ok()
                .map(|i| self.sorted[i].1)
                .or_else(|| self.staging.get(&key).copied()),
            None => self.fallback.get(normalized).copied(),
        }
    }

    fn allocate(&mut self, normalized: &str) -> AddressId {
        let id = self.by_id.len() as AddressId + 1;
        match Self::pack(normalized) {
            Some(key) => {
                self.staging.insert(key, id);
                self.by_id.push(StoredKey::Packed(key));
                if self.staging.len() >= MERGE_THRESHOLD {
                    self.merge_staging();
                }
            }
            None => {
                self.fallback.insert(normalized.to_string(), id);
                self.by_id.push(StoredKey::Text(normalized.to_string()));
            }
        }
        id
    }

    fn decode(&self, id: AddressId) -> Option<String> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.by_id.get(index).map(|key| match key {
            StoredKey::Packed(bytes) => format!("0x{}", hex::encode(bytes)),
            StoredKey::Text(text) => text.clone(),
        })
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

// ─── AddressCache ────────────────────────────────────────────────────────────

/// Address cache over a selected encoder.
pub struct AddressCache {
    backend: AddressBackend,
    encoder: Box<dyn AddressEncoder>,
}

impl std::fmt::Debug for AddressCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressCache")
            .field("backend", &self.backend)
            .field("len", &self.encoder.len())
            .finish()
    }
}

impl AddressCache {
    pub fn new(backend: AddressBackend) -> Self {
        let encoder: Box<dyn AddressEncoder> = match backend {
            AddressBackend::HashMap => Box::<HashMapEncoder>::default(),
            AddressBackend::Packed => Box::<PackedEncoder>::default(),
        };
        Self { backend, encoder }
    }

    /// Replay a persisted `(id, address)` table in id order.
    ///
    /// Each address is encoded again and must come back with its stored id.
    /// Nothing is written back to the store.
    pub fn rebuild(
        backend: AddressBackend,
        rows: &[(AddressId, String)],
    ) -> Result<Self, IndexerError> {
        let mut cache = Self::new(backend);
        let mut last_good = None;
        for (expected, address) in rows {
            let actual = cache.encode_local(address);
            if actual != *expected {
                warn!(
                    expected,
                    actual,
                    ?last_good,
                    %address,
                    "address table does not replay consistently"
                );
                return Err(IndexerError::InconsistentAddressEncoding {
                    expected: *expected,
                    actual,
                    last_good,
                });
            }
            last_good = Some(actual);
        }
        info!(addresses = cache.len(), ?backend, "address cache rebuilt");
        Ok(cache)
    }

    fn encode_local(&mut self, address: &str) -> AddressId {
        let normalized = normalize(address);
        match self.encoder.lookup(&normalized) {
            Some(id) => id,
            None => self.encoder.allocate(&normalized),
        }
    }

    /// Return the id for `address`, allocating and persisting a new one when
    /// it has not been seen.
    pub async fn encode(
        &mut self,
        address: &str,
        tx: &mut dyn StoreTransaction,
    ) -> Result<AddressId, IndexerError> {
        let normalized = normalize(address);
        if let Some(id) = self.encoder.lookup(&normalized) {
            return Ok(id);
        }
        let id = self.encoder.allocate(&normalized);
        tx.insert_address(id, &normalized).await?;
        Ok(id)
    }

    /// Lookup only. Unseen addresses have no data.
    pub fn encode_if_present(&self, address: &str) -> Option<AddressId> {
        self.encoder.lookup(&normalize(address))
    }

    pub fn decode(&self, id: AddressId) -> Result<String, IndexerError> {
        self.encoder
            .decode(id)
            .ok_or(IndexerError::UnknownAddressId(id))
    }

    pub fn backend(&self) -> AddressBackend {
        self.backend
    }

    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IndexStore, MemoryStore};

    const BACKENDS: [AddressBackend; 2] = [AddressBackend::HashMap, AddressBackend::Packed];
    const ALICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[tokio::test]
    async fn encode_assigns_dense_ids_case_insensitively() {
        for backend in BACKENDS {
            let store = MemoryStore::new();
            let mut tx = store.begin().await.unwrap();
            let mut cache = AddressCache::new(backend);

            assert_eq!(cache.encode("0xabc", tx.as_mut()).await.unwrap(), 1);
            assert_eq!(cache.encode("0xdef", tx.as_mut()).await.unwrap(), 2);
            assert_eq!(cache.decode(1).unwrap(), "0xabc");
            assert_eq!(cache.encode("0XABC", tx.as_mut()).await.unwrap(), 1);
            assert_eq!(cache.encode(ALICE, tx.as_mut()).await.unwrap(), 3);
            let shouted = ALICE.to_uppercase().replacen("0X", "0x", 1);
            assert_eq!(cache.encode(&shouted, tx.as_mut()).await.unwrap(), 3);
            assert_eq!(cache.decode(3).unwrap(), normalize(ALICE));
            tx.commit().await.unwrap();

            assert_eq!(store.load_addresses().await.unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn encode_if_present_never_allocates() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut cache = AddressCache::new(AddressBackend::HashMap);
        assert_eq!(cache.encode_if_present(ALICE), None);
        cache.encode(ALICE, tx.as_mut()).await.unwrap();
        assert_eq!(cache.encode_if_present(&ALICE.to_lowercase()), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn decode_unknown_id_fails() {
        let cache = AddressCache::new(AddressBackend::Packed);
        assert!(matches!(cache.decode(0), Err(IndexerError::UnknownAddressId(0))));
        assert!(matches!(cache.decode(7), Err(IndexerError::UnknownAddressId(7))));
    }

    #[tokio::test]
    async fn rebuild_reproduces_assignments() {
        for backend in BACKENDS {
            let store = MemoryStore::new();
            let mut tx = store.begin().await.unwrap();
            let mut cache = AddressCache::new(backend);
            let inputs = ["0x00", ALICE, "0xABC", "0xabc", "miner-x", ALICE];
            let mut ids = Vec::new();
            for a in inputs {
                ids.push(cache.encode(a, tx.as_mut()).await.unwrap());
            }
            tx.commit().await.unwrap();

            let rows = store.load_addresses().await.unwrap();
            let rebuilt = AddressCache::rebuild(backend, &rows).unwrap();
            for (a, id) in inputs.iter().zip(ids) {
                assert_eq!(rebuilt.encode_if_present(a), Some(id));
            }
            assert_eq!(rebuilt.len(), 4);
        }
    }

    #[test]
    fn rebuild_reports_last_good_id() {
        let rows = vec![
            (1, "0x01".to_string()),
            (2, "0x02".to_string()),
            (4, "0x04".to_string()),
        ];
        let err = AddressCache::rebuild(AddressBackend::HashMap, &rows).unwrap_err();
        match err {
            IndexerError::InconsistentAddressEncoding { expected, actual, last_good } => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
                assert_eq!(last_good, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rebuild_detects_duplicate_address_at_first_row() {
        let rows = vec![(2, "0x01".to_string())];
        let err = AddressCache::rebuild(AddressBackend::Packed, &rows).unwrap_err();
        assert!(matches!(
            err,
            IndexerError::InconsistentAddressEncoding { last_good: None, .. }
        ));
    }

    #[test]
    fn packed_encoder_survives_merges() {
        let mut encoder = PackedEncoder::default();
        let addresses: Vec<String> = (0..MERGE_THRESHOLD as u32 + 10)
            .map(|i| format!("0x{:040x}", u64::from(i) * 7919))
            .collect();
        for (i, a) in addresses.iter().enumerate() {
            assert_eq!(encoder.allocate(a), i as AddressId + 1);
        }
        assert_eq!(encoder.sorted.len(), MERGE_THRESHOLD);
        assert_eq!(encoder.staging.len(), 10);
        for (i, a) in addresses.iter().enumerate().step_by(997) {
            assert_eq!(encoder.lookup(a), Some(i as AddressId + 1));
            assert_eq!(encoder.decode(i as AddressId + 1).as_deref(), Some(a.as_str()));
        }
    }
}
