// Contract registry cache behavior: TTL, LRU, single-flight, integrity.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ivm_models::{Contract, ContractKind, ContractStatus, ImpactRule};
use ivm_propagator::errors::RegistryError;
use ivm_propagator::registry::{
    ContractLoader, ContractRegistry, StaticContractLoader,
};

struct CountingLoader {
    loads: AtomicUsize,
    delay: Duration,
    tamper_checksum: bool,
}

impl CountingLoader {
    fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            delay: Duration::ZERO,
            tamper_checksum: false,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn tampered() -> Self {
        Self {
            tamper_checksum: true,
            ..Self::new()
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractLoader for CountingLoader {
    async fn load(
        &self,
        kind: ContractKind,
        id: &str,
        version: &str,
    ) -> Result<Contract, RegistryError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut contract = Contract::sealed(
            kind,
            id,
            version,
            ContractStatus::Active,
            vec![ImpactRule::new("/price", ["CORE"])],
        );
        if self.tamper_checksum {
            contract.checksum = "0000".to_string();
        }
        Ok(contract)
    }
}

fn registry(
    loader: Arc<dyn ContractLoader>,
    ttl: Duration,
    max_entries: usize,
) -> ContractRegistry {
    ContractRegistry::new(loader, ttl, max_entries, Duration::from_secs(5))
}

#[tokio::test]
async fn concurrent_misses_coalesce_into_one_load() -> Result<()> {
    let loader = Arc::new(CountingLoader::with_delay(Duration::from_millis(
        50,
    )));
    let registry = Arc::new(registry(
        loader.clone(),
        Duration::from_secs(60),
        16,
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.get(ContractKind::RuleSet, "product", "1.0.0").await
        }));
    }
    for handle in handles {
        let contract = handle.await??;
        assert_eq!(contract.id, "product");
    }

    assert_eq!(loader.loads(), 1);
    let stats = registry.stats().await;
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.entries, 1);
    Ok(())
}

#[tokio::test]
async fn ttl_expiry_reloads_lazily() -> Result<()> {
    let loader = Arc::new(CountingLoader::new());
    let registry =
        registry(loader.clone(), Duration::from_millis(50), 16);

    registry.get(ContractKind::RuleSet, "product", "1.0.0").await?;
    registry.get(ContractKind::RuleSet, "product", "1.0.0").await?;
    assert_eq!(loader.loads(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    registry.get(ContractKind::RuleSet, "product", "1.0.0").await?;
    assert_eq!(loader.loads(), 2);
    assert_eq!(registry.stats().await.expirations, 1);
    Ok(())
}

#[tokio::test]
async fn lru_evicts_the_least_recently_used_entry() -> Result<()> {
    let loader = Arc::new(CountingLoader::new());
    let registry = registry(loader.clone(), Duration::from_secs(60), 2);

    registry.get(ContractKind::RuleSet, "a", "1").await?;
    registry.get(ContractKind::RuleSet, "b", "1").await?;
    // Touch "a" so "b" is the LRU victim.
    registry.get(ContractKind::RuleSet, "a", "1").await?;
    registry.get(ContractKind::RuleSet, "c", "1").await?;

    let stats = registry.stats().await;
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.entries, 2);

    // "a" survived; "b" takes a fresh load.
    let loads_before = loader.loads();
    registry.get(ContractKind::RuleSet, "a", "1").await?;
    assert_eq!(loader.loads(), loads_before);
    registry.get(ContractKind::RuleSet, "b", "1").await?;
    assert_eq!(loader.loads(), loads_before + 1);
    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_is_fatal_and_never_cached() -> Result<()> {
    let loader = Arc::new(CountingLoader::tampered());
    let registry = registry(loader.clone(), Duration::from_secs(60), 16);

    let err = registry
        .get(ContractKind::RuleSet, "product", "1.0.0")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ChecksumMismatch { .. }));
    assert_eq!(registry.stats().await.entries, 0);

    // No negative caching: the next miss goes back to the loader.
    let _ = registry.get(ContractKind::RuleSet, "product", "1.0.0").await;
    assert_eq!(loader.loads(), 2);
    Ok(())
}

#[tokio::test]
async fn missing_contract_becomes_visible_after_publication() -> Result<()> {
    let loader = Arc::new(StaticContractLoader::new());
    let registry = ContractRegistry::new(
        loader.clone(),
        Duration::from_secs(60),
        16,
        Duration::from_secs(5),
    );

    let err = registry
        .get(ContractKind::RuleSet, "product", "1.0.0")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));

    loader.register(Contract::sealed(
        ContractKind::RuleSet,
        "product",
        "1.0.0",
        ContractStatus::Active,
        vec![ImpactRule::new("/price", ["CORE"])],
    ));
    let contract = registry
        .get(ContractKind::RuleSet, "product", "1.0.0")
        .await?;
    assert_eq!(contract.version, "1.0.0");
    Ok(())
}

#[tokio::test]
async fn put_rejects_a_tampered_contract() {
    let registry = ContractRegistry::new(
        Arc::new(StaticContractLoader::new()),
        Duration::from_secs(60),
        16,
        Duration::from_secs(5),
    );
    let mut contract = Contract::sealed(
        ContractKind::RuleSet,
        "product",
        "1.0.0",
        ContractStatus::Active,
        vec![ImpactRule::new("/price", ["CORE"])],
    );
    contract.impact_map.push(ImpactRule::new("/name", ["SEARCH"]));

    let err = registry.put(contract).await.unwrap_err();
    assert!(matches!(err, RegistryError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn invalidate_forces_a_reload() -> Result<()> {
    let loader = Arc::new(CountingLoader::new());
    let registry = registry(loader.clone(), Duration::from_secs(60), 16);

    registry.get(ContractKind::RuleSet, "product", "1.0.0").await?;
    registry
        .invalidate(ContractKind::RuleSet, "product", "1.0.0")
        .await;
    registry.get(ContractKind::RuleSet, "product", "1.0.0").await?;
    assert_eq!(loader.loads(), 2);
    Ok(())
}
