use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ivm_models::{
    ChangeSet, ChangeType, EntityVersion, OutboxEntry, OutboxStatus, Webhook,
    WebhookDelivery,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::traits::*;

/// Entity lineages, change sets and the outbox live behind one lock so that
/// `MutationStorage::commit` is a genuine single unit of work.
#[derive(Default)]
struct PropagationState {
    entities: HashMap<(String, String), Vec<EntityVersion>>,
    change_sets: HashMap<String, ChangeSet>,
    outbox: HashMap<Uuid, OutboxEntry>,
}

type SharedState = Arc<RwLock<PropagationState>>;

#[derive(Clone)]
pub struct MemoryMutationStorage {
    state: SharedState,
}

#[derive(Clone)]
pub struct MemoryChangeSetStorage {
    state: SharedState,
}

#[derive(Clone)]
pub struct MemoryOutboxStorage {
    state: SharedState,
}

#[derive(Clone)]
pub struct MemoryWebhookStorage {
    store: Arc<RwLock<HashMap<Uuid, Webhook>>>,
}

#[derive(Clone)]
pub struct MemoryDeliveryStorage {
    store: Arc<RwLock<Vec<WebhookDelivery>>>,
}

#[async_trait]
impl StorageHealth for MemoryMutationStorage {
    async fn health(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageHealth for MemoryChangeSetStorage {
    async fn health(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageHealth for MemoryOutboxStorage {
    async fn health(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageHealth for MemoryWebhookStorage {
    async fn health(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageHealth for MemoryDeliveryStorage {
    async fn health(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl MutationStorage for MemoryMutationStorage {
    async fn commit(&self, record: MutationRecord) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let cs = &record.change_set;
        let lineage_key = (cs.tenant.clone(), cs.entity_key.clone());

        // A different record under the same deterministic id is rejected.
        // An identical record is a replay no-op only while its effect is
        // still visible: deleting an entity and re-creating it with the
        // same payload derives the same id, and that mutation must be
        // applied again, not skipped.
        if let Some(existing) = state.change_sets.get(&cs.id) {
            if existing != cs {
                return Err(crate::StorageError::IdempotencyViolation(
                    cs.id.clone(),
                ));
            }
            let effect_applied = match cs.change_type {
                ChangeType::Create | ChangeType::Update => state
                    .entities
                    .get(&lineage_key)
                    .map(|versions| {
                        versions
                            .iter()
                            .any(|v| v.version == record.entity.version)
                    })
                    .unwrap_or(false),
                ChangeType::Delete => {
                    !state.entities.contains_key(&lineage_key)
                }
            };
            if effect_applied {
                return Ok(());
            }
        }

        match cs.change_type {
            ChangeType::Create | ChangeType::Update => {
                let entity = record.entity.clone();
                let expected = state
                    .entities
                    .get(&lineage_key)
                    .and_then(|versions| versions.last())
                    .map(|latest| latest.version + 1)
                    .unwrap_or(1);
                if entity.version != expected {
                    return Err(crate::StorageError::VersionConflict {
                        entity: format!("{}:{}", cs.tenant, cs.entity_key),
                        expected,
                        got: entity.version,
                    });
                }
                state
                    .entities
                    .entry(lineage_key)
                    .or_default()
                    .push(entity);
            }
            ChangeType::Delete => {
                if state.entities.remove(&lineage_key).is_none() {
                    return Err(crate::StorageError::NotFound(format!(
                        "{}:{}",
                        cs.tenant, cs.entity_key
                    )));
                }
            }
        }

        state.change_sets.insert(cs.id.clone(), cs.clone());
        for entry in &record.entries {
            state.outbox.insert(entry.id, entry.clone());
        }
        Ok(())
    }

    async fn get_latest(
        &self,
        tenant: &str,
        entity_key: &str,
    ) -> StorageResult<Option<EntityVersion>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .get(&(tenant.to_string(), entity_key.to_string()))
            .and_then(|versions| versions.last())
            .cloned())
    }

    async fn get_version(
        &self,
        tenant: &str,
        entity_key: &str,
        version: u64,
    ) -> StorageResult<Option<EntityVersion>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .get(&(tenant.to_string(), entity_key.to_string()))
            .and_then(|versions| {
                versions.iter().find(|v| v.version == version)
            })
            .cloned())
    }
}

#[async_trait]
impl ChangeSetStorage for MemoryChangeSetStorage {
    async fn insert(&self, change_set: &ChangeSet) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.change_sets.get(&change_set.id) {
            if existing == change_set {
                return Ok(());
            }
            return Err(crate::StorageError::IdempotencyViolation(
                change_set.id.clone(),
            ));
        }
        state
            .change_sets
            .insert(change_set.id.clone(), change_set.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<ChangeSet>> {
        let state = self.state.read().await;
        Ok(state.change_sets.get(id).cloned())
    }

    async fn list_for_entity(
        &self,
        tenant: &str,
        entity_key: &str,
    ) -> StorageResult<Vec<ChangeSet>> {
        let state = self.state.read().await;
        let mut sets: Vec<ChangeSet> = state
            .change_sets
            .values()
            .filter(|cs| cs.tenant == tenant && cs.entity_key == entity_key)
            .cloned()
            .collect();
        sets.sort_by_key(|cs| cs.to_version.unwrap_or(u64::MAX));
        Ok(sets)
    }
}

#[async_trait]
impl OutboxStorage for MemoryOutboxStorage {
    async fn insert(&self, entry: &OutboxEntry) -> StorageResult<()> {
        if entry.parse_aggregate_id().is_none() {
            return Err(crate::StorageError::InvalidKey(
                entry.aggregate_id.clone(),
            ));
        }
        let mut state = self.state.write().await;
        state.outbox.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state.outbox.get(&id).cloned())
    }

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn list_recent(
        &self,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<OutboxEntry> =
            state.outbox.values().cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn list_dead_letter(
        &self,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .values()
            .filter(|e| e.is_dead_letter())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn list_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| crate::StorageError::Internal(e.to_string()))?;
        let state = self.state.read().await;
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .values()
            .filter(|e| {
                e.status == OutboxStatus::Pending
                    && e.claimed_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.claimed_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn claim_pending(
        &self,
        worker: &str,
        batch: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        // Aggregates with a live claim stay untouchable so per-aggregate
        // ordering holds across workers.
        let mut busy_aggregates: std::collections::HashSet<String> = state
            .outbox
            .values()
            .filter(|e| e.is_claimed())
            .map(|e| e.aggregate_id.clone())
            .collect();

        let mut candidates: Vec<(Uuid, chrono::DateTime<Utc>)> = state
            .outbox
            .values()
            .filter(|e| {
                e.status == OutboxStatus::Pending && e.claimed_at.is_none()
            })
            .map(|e| (e.id, e.created_at))
            .collect();
        candidates.sort_by_key(|(_, created_at)| *created_at);

        let mut claimed = Vec::new();
        for (id, _) in candidates {
            if claimed.len() >= batch {
                break;
            }
            let Some(entry) = state.outbox.get_mut(&id) else {
                continue;
            };
            if busy_aggregates.contains(&entry.aggregate_id) {
                continue;
            }
            busy_aggregates.insert(entry.aggregate_id.clone());
            entry.claimed_at = Some(now);
            entry.claimed_by = Some(worker.to_string());
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, id: Uuid) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| crate::StorageError::NotFound(id.to_string()))?;
        entry.status = OutboxStatus::Processed;
        entry.processed_at = Some(Utc::now());
        entry.claimed_at = None;
        entry.claimed_by = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| crate::StorageError::NotFound(id.to_string()))?;
        entry.status = OutboxStatus::Failed;
        entry.retry_count += 1;
        entry.claimed_at = None;
        entry.claimed_by = None;
        Ok(())
    }

    async fn reset_to_pending(&self, id: Uuid) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| crate::StorageError::NotFound(id.to_string()))?;
        if entry.status != OutboxStatus::Failed {
            return Err(crate::StorageError::InvalidTransition {
                id: id.to_string(),
                detail: "only FAILED entries can be reset".to_string(),
            });
        }
        if !entry.can_retry() {
            return Err(crate::StorageError::RetryExhausted(id.to_string()));
        }
        entry.status = OutboxStatus::Pending;
        entry.processed_at = None;
        entry.claimed_at = None;
        entry.claimed_by = None;
        Ok(())
    }

    async fn replay_dead_letter(&self, id: Uuid) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| crate::StorageError::NotFound(id.to_string()))?;
        if !entry.is_dead_letter() {
            return Err(crate::StorageError::InvalidTransition {
                id: id.to_string(),
                detail: "entry is not dead-lettered".to_string(),
            });
        }
        entry.retry_count = 0;
        entry.status = OutboxStatus::Pending;
        entry.processed_at = None;
        entry.claimed_at = None;
        entry.claimed_by = None;
        Ok(())
    }

    async fn release_stale(
        &self,
        older_than: Duration,
    ) -> StorageResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| crate::StorageError::Internal(e.to_string()))?;
        let mut state = self.state.write().await;
        let mut released = 0;
        for entry in state.outbox.values_mut() {
            if entry.status == OutboxStatus::Pending
                && entry.claimed_at.map(|at| at < cutoff).unwrap_or(false)
            {
                entry.claimed_at = None;
                entry.claimed_by = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl WebhookStorage for MemoryWebhookStorage {
    async fn store(&self, webhook: &Webhook) -> StorageResult<()> {
        let mut store = self.store.write().await;
        store.insert(webhook.id, webhook.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<Webhook>> {
        let store = self.store.read().await;
        Ok(store.get(&id).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<Webhook>> {
        let store = self.store.read().await;
        let mut hooks: Vec<Webhook> = store.values().cloned().collect();
        hooks.sort_by_key(|w| w.id);
        Ok(hooks)
    }

    async fn delete(&self, id: Uuid) -> StorageResult<()> {
        let mut store = self.store.write().await;
        store
            .remove(&id)
            .ok_or_else(|| crate::StorageError::NotFound(id.to_string()))?;
        Ok(())
    }

    async fn list_for_event(
        &self,
        event_type: &str,
    ) -> StorageResult<Vec<Webhook>> {
        let store = self.store.read().await;
        Ok(store
            .values()
            .filter(|w| w.subscribes_to(event_type))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryStorage for MemoryDeliveryStorage {
    async fn append(&self, delivery: &WebhookDelivery) -> StorageResult<()> {
        let mut store = self.store.write().await;
        store.push(delivery.clone());
        Ok(())
    }

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> StorageResult<Vec<WebhookDelivery>> {
        let store = self.store.read().await;
        let mut deliveries: Vec<WebhookDelivery> = store
            .iter()
            .filter(|d| d.webhook_id == webhook_id)
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deliveries.truncate(limit);
        Ok(deliveries)
    }
}

/// Factory whose mutation, change-set and outbox stores share one state so
/// commits stay atomic across all three views.
pub struct MemoryStorageFactory {
    state: SharedState,
    webhooks: Arc<RwLock<HashMap<Uuid, Webhook>>>,
    deliveries: Arc<RwLock<Vec<WebhookDelivery>>>,
}

impl MemoryStorageFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PropagationState::default())),
            webhooks: Arc::new(RwLock::new(HashMap::new())),
            deliveries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for MemoryStorageFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageFactory for MemoryStorageFactory {
    type MutationStorage = MemoryMutationStorage;
    type ChangeSetStorage = MemoryChangeSetStorage;
    type OutboxStorage = MemoryOutboxStorage;
    type WebhookStorage = MemoryWebhookStorage;
    type DeliveryStorage = MemoryDeliveryStorage;

    fn create_mutation_storage(&self) -> Self::MutationStorage {
        MemoryMutationStorage {
            state: self.state.clone(),
        }
    }

    fn create_changeset_storage(&self) -> Self::ChangeSetStorage {
        MemoryChangeSetStorage {
            state: self.state.clone(),
        }
    }

    fn create_outbox_storage(&self) -> Self::OutboxStorage {
        MemoryOutboxStorage {
            state: self.state.clone(),
        }
    }

    fn create_webhook_storage(&self) -> Self::WebhookStorage {
        MemoryWebhookStorage {
            store: self.webhooks.clone(),
        }
    }

    fn create_delivery_storage(&self) -> Self::DeliveryStorage {
        MemoryDeliveryStorage {
            store: self.deliveries.clone(),
        }
    }
}
