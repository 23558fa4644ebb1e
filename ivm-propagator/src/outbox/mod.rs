pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use ivm_models::{ChangeType, OutboxEntry, OutboxStatus};
use ivm_storage::{OutboxStorage, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::errors::OutboxError;

pub use worker::{ArtifactRebuilder, LoggingRebuilder, OutboxWorkerPool};

/// Payload of a SINK_SHIP entry. `payload` is absent for deletes, which
/// remove the document from the resolved sinks instead of upserting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkShipPayload {
    pub tenant: String,
    pub entity_type: String,
    pub entity_key: String,
    pub version: u64,
    pub artifact_type: String,
    pub change_set_id: String,
    pub change_type: ChangeType,
    pub payload: Option<Value>,
}

/// Payload of an ARTIFACT_REBUILD entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRebuildPayload {
    pub tenant: String,
    pub entity_type: String,
    pub entity_key: String,
    pub version: u64,
    pub artifact_type: String,
    pub change_set_id: String,
    pub matched_paths: Vec<String>,
}

/// Payload of a WEBHOOK_NOTIFY entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotifyPayload {
    pub event_type: String,
    pub body: Value,
}

/// Operator facade over the outbox store: inspection buckets and the
/// explicit retry / replay / release paths. Workers drive the normal
/// lifecycle; everything here is a human-initiated override.
pub struct OutboxService {
    storage: Arc<dyn OutboxStorage>,
}

impl OutboxService {
    pub fn new(storage: Arc<dyn OutboxStorage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, id: Uuid) -> Result<OutboxEntry, OutboxError> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))
    }

    pub async fn list_recent(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self.storage.list_recent(limit).await?)
    }

    pub async fn list_failed(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self
            .storage
            .list_by_status(OutboxStatus::Failed, limit)
            .await?)
    }

    pub async fn list_dead_letter(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self.storage.list_dead_letter(limit).await?)
    }

    pub async fn list_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self.storage.list_stale(older_than, limit).await?)
    }

    /// FAILED -> PENDING for one entry; rejected once the retry budget is
    /// spent, pointing the operator at the dead-letter replay path instead.
    pub async fn retry_entry(&self, id: Uuid) -> Result<(), OutboxError> {
        self.storage.reset_to_pending(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => OutboxError::NotFound(id.to_string()),
            StorageError::RetryExhausted(_) => {
                OutboxError::RetryExhausted(id.to_string())
            }
            StorageError::InvalidTransition { id, detail } => {
                OutboxError::InvalidTransition { id, detail }
            }
            other => OutboxError::Storage(other),
        })?;
        info!(entry = %id, "Outbox entry reset to pending");
        Ok(())
    }

    /// Requeues every retryable FAILED entry, up to `limit`. Dead-lettered
    /// entries are skipped, not errors.
    pub async fn retry_all_failed(
        &self,
        limit: usize,
    ) -> Result<usize, OutboxError> {
        let failed = self.list_failed(limit).await?;
        let mut requeued = 0;
        for entry in failed {
            if !entry.can_retry() {
                continue;
            }
            self.storage.reset_to_pending(entry.id).await?;
            requeued += 1;
        }
        info!(requeued, "Requeued failed outbox entries");
        Ok(requeued)
    }

    /// Explicit operator override: returns a dead-lettered entry to PENDING
    /// with a fresh retry budget.
    pub async fn replay_dead_letter(
        &self,
        id: Uuid,
    ) -> Result<(), OutboxError> {
        self.storage.replay_dead_letter(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => OutboxError::NotFound(id.to_string()),
            StorageError::InvalidTransition { id, detail } => {
                OutboxError::InvalidTransition { id, detail }
            }
            other => OutboxError::Storage(other),
        })?;
        info!(entry = %id, "Dead-letter entry replayed");
        Ok(())
    }

    /// Releases claims older than `older_than` back to PENDING. Returns the
    /// number of entries released.
    pub async fn release_stale(
        &self,
        older_than: Duration,
    ) -> Result<usize, OutboxError> {
        let released = self.storage.release_stale(older_than).await?;
        if released > 0 {
            info!(released, "Released stale outbox claims");
        }
        Ok(released)
    }
}
