use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ivm_models::{BatchShipResult, ShipItem, ShipResult, SinkRule};
use ivm_observability::HealthCheck;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::SinkError;

/// A destination for materialized artifacts (search index, recommendation
/// store). Shipping is idempotent per (entity key, version): last writer by
/// version wins and an older version arriving late is a no-op.
#[async_trait]
pub trait SinkShipper: Send + Sync {
    fn name(&self) -> &str;

    async fn ship(
        &self,
        tenant: &str,
        entity_key: &str,
        version: u64,
        payload: Value,
    ) -> Result<ShipResult, SinkError>;

    async fn ship_batch(
        &self,
        tenant: &str,
        items: Vec<ShipItem>,
    ) -> Result<BatchShipResult, SinkError> {
        let mut result = BatchShipResult::default();
        for item in items {
            match self
                .ship(tenant, &item.entity_key, item.version, item.payload)
                .await
            {
                Ok(_) => result.record_success(),
                Err(e) => {
                    warn!(sink = self.name(), key = %item.entity_key, error = %e, "Batch item failed");
                    result.record_failure(item.entity_key);
                }
            }
        }
        Ok(result)
    }

    async fn delete(
        &self,
        tenant: &str,
        entity_key: &str,
    ) -> Result<(), SinkError>;

    /// Liveness without a real ship; a slow sink degrades to Unknown
    /// instead of blocking the caller.
    async fn health(&self, timeout: Duration) -> HealthCheck;
}

/// In-memory sink used in composition and tests; behaves like a tiny
/// search index keyed by `tenant:entityKey`.
pub struct MemorySearchSink {
    name: String,
    documents: RwLock<HashMap<String, (u64, Value)>>,
}

impl MemorySearchSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, tenant: &str, entity_key: &str) -> Option<(u64, Value)> {
        let docs = self.documents.read().await;
        docs.get(&doc_key(tenant, entity_key)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn doc_key(tenant: &str, entity_key: &str) -> String {
    format!("{}:{}", tenant, entity_key)
}

#[async_trait]
impl SinkShipper for MemorySearchSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ship(
        &self,
        tenant: &str,
        entity_key: &str,
        version: u64,
        payload: Value,
    ) -> Result<ShipResult, SinkError> {
        let mut docs = self.documents.write().await;
        let key = doc_key(tenant, entity_key);
        match docs.get(&key) {
            Some((existing, _)) if *existing >= version => {
                debug!(sink = %self.name, %key, existing, version, "Ship superseded by newer version");
                Ok(ShipResult::Superseded)
            }
            _ => {
                docs.insert(key, (version, payload));
                Ok(ShipResult::Shipped)
            }
        }
    }

    async fn delete(
        &self,
        tenant: &str,
        entity_key: &str,
    ) -> Result<(), SinkError> {
        let mut docs = self.documents.write().await;
        docs.remove(&doc_key(tenant, entity_key));
        Ok(())
    }

    async fn health(&self, _timeout: Duration) -> HealthCheck {
        HealthCheck::healthy()
    }
}

/// Resolves SinkRule fan-out and ships to every configured sink; a failing
/// sink never blocks delivery to the others.
pub struct SinkRouter {
    sinks: HashMap<String, Arc<dyn SinkShipper>>,
    rules: Vec<SinkRule>,
}

impl SinkRouter {
    pub fn new(
        sinks: Vec<Arc<dyn SinkShipper>>,
        rules: Vec<SinkRule>,
    ) -> Self {
        let sinks = sinks
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();
        Self { sinks, rules }
    }

    pub fn sink(&self, name: &str) -> Result<Arc<dyn SinkShipper>, SinkError> {
        self.sinks
            .get(name)
            .cloned()
            .ok_or_else(|| SinkError::UnknownSink(name.to_string()))
    }

    /// Sink names configured for (entity type, artifact type), across every
    /// matching rule.
    pub fn resolve(
        &self,
        entity_type: &str,
        artifact_type: &str,
    ) -> Vec<String> {
        let mut names = Vec::new();
        for rule in &self.rules {
            if rule.entity_type == entity_type
                && rule.artifact_type == artifact_type
            {
                for name in &rule.sink_names {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }
        names
    }

    /// Ships to all resolved sinks; returns per-sink outcomes. Errors from
    /// one sink are collected, not propagated mid-loop.
    pub async fn ship_fan_out(
        &self,
        entity_type: &str,
        artifact_type: &str,
        tenant: &str,
        entity_key: &str,
        version: u64,
        payload: &Value,
    ) -> Vec<(String, Result<ShipResult, SinkError>)> {
        let mut outcomes = Vec::new();
        for name in self.resolve(entity_type, artifact_type) {
            let outcome = match self.sink(&name) {
                Ok(sink) => {
                    sink.ship(tenant, entity_key, version, payload.clone())
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                warn!(sink = %name, key = %entity_key, error = %e, "Sink ship failed");
            }
            outcomes.push((name, outcome));
        }
        outcomes
    }

    pub async fn delete_fan_out(
        &self,
        entity_type: &str,
        artifact_type: &str,
        tenant: &str,
        entity_key: &str,
    ) -> Vec<(String, Result<(), SinkError>)> {
        let mut outcomes = Vec::new();
        for name in self.resolve(entity_type, artifact_type) {
            let outcome = match self.sink(&name) {
                Ok(sink) => sink.delete(tenant, entity_key).await,
                Err(e) => Err(e),
            };
            outcomes.push((name, outcome));
        }
        outcomes
    }

    /// Health of every registered sink, polled without shipping.
    pub async fn health_all(
        &self,
        timeout: Duration,
    ) -> HashMap<String, HealthCheck> {
        let mut results = HashMap::new();
        for (name, sink) in &self.sinks {
            results.insert(name.clone(), sink.health(timeout).await);
        }
        results
    }
}
