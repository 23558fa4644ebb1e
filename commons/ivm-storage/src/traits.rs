use std::time::Duration;

use crate::error::StorageError;
use async_trait::async_trait;
use ivm_models::{
    ChangeSet, EntityVersion, OutboxEntry, OutboxStatus, Webhook,
    WebhookDelivery,
};
use uuid::Uuid;

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait StorageHealth: Send + Sync {
    /// Lightweight connectivity check to the backing store.
    async fn health(&self) -> StorageResult<()>;
}

/// Everything written by one entity mutation, committed as a single unit of
/// work. Either all of it lands or none of it does; this is how "at least
/// one event exists for every committed mutation" holds without a two-phase
/// commit to an external broker.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub entity: EntityVersion,
    pub change_set: ChangeSet,
    pub entries: Vec<OutboxEntry>,
}

#[async_trait]
pub trait MutationStorage: Send + Sync + StorageHealth {
    /// Atomically persist the entity version, its ChangeSet and the outbox
    /// entries. Enforces monotonically increasing versions per
    /// (tenant, entity key) and ChangeSet idempotency.
    async fn commit(&self, record: MutationRecord) -> StorageResult<()>;

    async fn get_latest(
        &self,
        tenant: &str,
        entity_key: &str,
    ) -> StorageResult<Option<EntityVersion>>;

    async fn get_version(
        &self,
        tenant: &str,
        entity_key: &str,
        version: u64,
    ) -> StorageResult<Option<EntityVersion>>;
}

#[async_trait]
pub trait ChangeSetStorage: Send + Sync + StorageHealth {
    /// Insert is idempotent on the deterministic id: re-inserting the same
    /// record is a no-op, while a different record under the same id is an
    /// idempotency violation.
    async fn insert(&self, change_set: &ChangeSet) -> StorageResult<()>;
    async fn get(&self, id: &str) -> StorageResult<Option<ChangeSet>>;
    async fn list_for_entity(
        &self,
        tenant: &str,
        entity_key: &str,
    ) -> StorageResult<Vec<ChangeSet>>;
}

#[async_trait]
pub trait OutboxStorage: Send + Sync + StorageHealth {
    async fn insert(&self, entry: &OutboxEntry) -> StorageResult<()>;
    async fn get(&self, id: Uuid) -> StorageResult<Option<OutboxEntry>>;

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>>;
    async fn list_recent(&self, limit: usize)
    -> StorageResult<Vec<OutboxEntry>>;
    /// FAILED entries past the retry budget.
    async fn list_dead_letter(
        &self,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>>;
    /// PENDING entries claimed longer than `older_than` ago.
    async fn list_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>>;

    /// Optimistically claim up to `batch` unclaimed PENDING entries for
    /// `worker`. Never hands out two entries with the same aggregate id at
    /// once, and skips aggregates that already have a live claim, so
    /// per-aggregate ordering is preserved across concurrent workers.
    async fn claim_pending(
        &self,
        worker: &str,
        batch: usize,
    ) -> StorageResult<Vec<OutboxEntry>>;

    async fn mark_processed(&self, id: Uuid) -> StorageResult<()>;
    /// Marks FAILED, increments the retry count and clears the claim.
    async fn mark_failed(&self, id: Uuid) -> StorageResult<()>;
    /// FAILED -> PENDING; rejected once the retry budget is exhausted.
    async fn reset_to_pending(&self, id: Uuid) -> StorageResult<()>;
    /// Explicit dead-letter override: resets the retry count and returns the
    /// entry to PENDING.
    async fn replay_dead_letter(&self, id: Uuid) -> StorageResult<()>;
    /// Releases claims older than `older_than` back to PENDING, handling
    /// crashed workers. Returns the number of entries released.
    async fn release_stale(&self, older_than: Duration)
    -> StorageResult<usize>;
}

#[async_trait]
pub trait WebhookStorage: Send + Sync + StorageHealth {
    async fn store(&self, webhook: &Webhook) -> StorageResult<()>;
    async fn get(&self, id: Uuid) -> StorageResult<Option<Webhook>>;
    async fn list(&self) -> StorageResult<Vec<Webhook>>;
    async fn delete(&self, id: Uuid) -> StorageResult<()>;
    async fn list_for_event(
        &self,
        event_type: &str,
    ) -> StorageResult<Vec<Webhook>>;
}

#[async_trait]
pub trait DeliveryStorage: Send + Sync + StorageHealth {
    /// Append-only; delivery records are never updated in place.
    async fn append(&self, delivery: &WebhookDelivery) -> StorageResult<()>;
    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> StorageResult<Vec<WebhookDelivery>>;
}

pub trait StorageFactory {
    type MutationStorage: MutationStorage;
    type ChangeSetStorage: ChangeSetStorage;
    type OutboxStorage: OutboxStorage;
    type WebhookStorage: WebhookStorage;
    type DeliveryStorage: DeliveryStorage;

    fn create_mutation_storage(&self) -> Self::MutationStorage;
    fn create_changeset_storage(&self) -> Self::ChangeSetStorage;
    fn create_outbox_storage(&self) -> Self::OutboxStorage;
    fn create_webhook_storage(&self) -> Self::WebhookStorage;
    fn create_delivery_storage(&self) -> Self::DeliveryStorage;
}
