use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ivm_models::{Contract, ContractKind, contract_cache_key};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, warn};

use crate::errors::RegistryError;

/// Port to the physical contract store (YAML source, KV store) — out of
/// scope for the core; the registry only needs this seam.
#[async_trait]
pub trait ContractLoader: Send + Sync {
    async fn load(
        &self,
        kind: ContractKind,
        id: &str,
        version: &str,
    ) -> Result<Contract, RegistryError>;
}

/// Loader over a fixed in-memory contract set. The default seam filler for
/// compositions without a physical contract store, and the workhorse of the
/// registry tests.
#[derive(Default)]
pub struct StaticContractLoader {
    contracts: std::sync::RwLock<HashMap<String, Contract>>,
}

impl StaticContractLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, contract: Contract) {
        let key = contract.cache_key();
        let mut contracts =
            self.contracts.write().unwrap_or_else(|e| e.into_inner());
        contracts.insert(key, contract);
    }
}

#[async_trait]
impl ContractLoader for StaticContractLoader {
    async fn load(
        &self,
        kind: ContractKind,
        id: &str,
        version: &str,
    ) -> Result<Contract, RegistryError> {
        let key = contract_cache_key(kind, id, version);
        let contracts =
            self.contracts.read().unwrap_or_else(|e| e.into_inner());
        contracts
            .get(&key)
            .cloned()
            .ok_or(RegistryError::NotFound(key))
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub loads: u64,
    pub entries: usize,
}

struct CacheEntry {
    contract: Arc<Contract>,
    inserted_at: Instant,
    last_access: Instant,
}

type LoadCell = Arc<OnceCell<Result<Arc<Contract>, RegistryError>>>;

/// Caches verified contracts with TTL expiry, bounded LRU eviction and
/// single-flight load coalescing. Failed or absent lookups are never cached,
/// so a contract published after a miss becomes visible immediately.
pub struct ContractRegistry {
    loader: Arc<dyn ContractLoader>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, LoadCell>>,
    ttl: Duration,
    max_entries: usize,
    load_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    loads: AtomicU64,
}

impl ContractRegistry {
    pub fn new(
        loader: Arc<dyn ContractLoader>,
        ttl: Duration,
        max_entries: usize,
        load_timeout: Duration,
    ) -> Self {
        Self {
            loader,
            cache: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            load_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// Cached contract for `kind:id@version`, loading through the port on a
    /// miss. Concurrent misses for the same key coalesce into exactly one
    /// underlying load whose outcome every caller shares.
    pub async fn get(
        &self,
        kind: ContractKind,
        id: &str,
        version: &str,
    ) -> Result<Arc<Contract>, RegistryError> {
        let key = contract_cache_key(kind, id, version);

        if let Some(contract) = self.cached(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(contract);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| self.load_and_verify(kind, id, version, &key))
            .await
            .clone();

        // The coalescing window closes once the load settles; a later miss
        // (TTL expiry or a failed load being retried) starts a fresh flight.
        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key);
        }

        result
    }

    pub async fn put(&self, contract: Contract) -> Result<(), RegistryError> {
        let key = contract.cache_key();
        if !contract.verify_checksum() {
            return Err(RegistryError::ChecksumMismatch {
                key,
                stored: contract.checksum.clone(),
                computed: contract.compute_checksum(),
            });
        }
        self.insert(key, Arc::new(contract)).await;
        Ok(())
    }

    pub async fn invalidate(&self, kind: ContractKind, id: &str, version: &str) {
        let key = contract_cache_key(kind, id, version);
        let mut cache = self.cache.write().await;
        cache.remove(&key);
    }

    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.cache.read().await.len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            entries,
        }
    }

    async fn cached(&self, key: &str) -> Option<Arc<Contract>> {
        {
            let cache = self.cache.read().await;
            match cache.get(key) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {}
                Some(_) => {
                    // Expired; fall through to the write path for eviction.
                }
                None => return None,
            }
        }
        let mut cache = self.cache.write().await;
        match cache.get_mut(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_access = Instant::now();
                Some(entry.contract.clone())
            }
            Some(_) => {
                cache.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Evicted expired contract from cache");
                None
            }
            None => None,
        }
    }

    async fn insert(&self, key: String, contract: Arc<Contract>) {
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CacheEntry {
                contract,
                inserted_at: now,
                last_access: now,
            },
        );
        while cache.len() > self.max_entries {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(victim) => {
                    cache.remove(&victim);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %victim, "LRU-evicted contract from cache");
                }
                None => break,
            }
        }
    }

    async fn load_and_verify(
        &self,
        kind: ContractKind,
        id: &str,
        version: &str,
        key: &str,
    ) -> Result<Arc<Contract>, RegistryError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let loaded = tokio::time::timeout(
            self.load_timeout,
            self.loader.load(kind, id, version),
        )
        .await
        .map_err(|_| {
            warn!(key, "Contract load timed out");
            RegistryError::Timeout(key.to_string())
        })??;

        let computed = loaded.compute_checksum();
        if loaded.checksum != computed {
            // Integrity failure is a deployment-time defect, never served.
            error!(
                key,
                stored = %loaded.checksum,
                computed = %computed,
                "Contract checksum mismatch"
            );
            return Err(RegistryError::ChecksumMismatch {
                key: key.to_string(),
                stored: loaded.checksum.clone(),
                computed,
            });
        }

        let contract = Arc::new(loaded);
        self.insert(key.to_string(), contract.clone()).await;
        Ok(contract)
    }
}
