use std::sync::Arc;

use ivm_models::{
    ChangeSet, ChangeType, ContractKind, EntityVersion, OutboxEntry,
    OutboxEventType,
};
use ivm_storage::{MutationRecord, MutationStorage, WebhookStorage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::changeset::ChangeSetBuilder;
use crate::errors::{ChangeSetError, PropagationError};
use crate::impact;
use crate::outbox::{
    ArtifactRebuildPayload, SinkShipPayload, WebhookNotifyPayload,
};
use crate::registry::ContractRegistry;
use crate::sinks::SinkRouter;

/// Which RuleSet contract drives impact calculation for a mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRef {
    pub id: String,
    pub version: String,
}

/// What one accepted mutation produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub change_set_id: String,
    pub change_type: ChangeType,
    pub version: Option<u64>,
    pub impacted_artifact_types: Vec<String>,
    pub outbox_entries: usize,
}

/// Ties the propagation flow together: previous version lookup, contract
/// fetch, ChangeSet derivation, fail-closed impact calculation, outbox entry
/// construction and the single atomic commit. Nothing is persisted until the
/// whole flow has succeeded.
pub struct IngestService {
    mutations: Arc<dyn MutationStorage>,
    registry: Arc<ContractRegistry>,
    sinks: Arc<SinkRouter>,
    webhooks: Arc<dyn WebhookStorage>,
}

impl IngestService {
    pub fn new(
        mutations: Arc<dyn MutationStorage>,
        registry: Arc<ContractRegistry>,
        sinks: Arc<SinkRouter>,
        webhooks: Arc<dyn WebhookStorage>,
    ) -> Self {
        Self {
            mutations,
            registry,
            sinks,
            webhooks,
        }
    }

    pub async fn ingest(
        &self,
        tenant: &str,
        entity_type: &str,
        entity_key: &str,
        to_version: u64,
        payload: Value,
        contract: &ContractRef,
    ) -> Result<IngestOutcome, PropagationError> {
        let entity = EntityVersion::new(
            tenant,
            entity_type,
            entity_key,
            to_version,
            payload,
        );
        entity.validate()?;

        let previous = self.mutations.get_latest(tenant, entity_key).await?;
        let expected = previous.as_ref().map(|p| p.version + 1).unwrap_or(1);
        if to_version != expected {
            return Err(ChangeSetError::VersionConflict {
                expected,
                got: to_version,
            }
            .into());
        }

        let change_set = self
            .derive_change_set(
                &entity,
                previous.as_ref(),
                Some(&entity.payload),
                contract,
            )
            .await?;

        let entries = self
            .build_entries(&change_set, Some(&entity.payload))
            .await?;
        let outcome = outcome_of(&change_set, entries.len());

        self.mutations
            .commit(MutationRecord {
                entity,
                change_set,
                entries,
            })
            .await?;

        info!(
            tenant,
            entity_key,
            version = to_version,
            change_set = %outcome.change_set_id,
            outbox_entries = outcome.outbox_entries,
            "Mutation committed"
        );
        Ok(outcome)
    }

    /// Removes the entity lineage and propagates the deletion downstream.
    pub async fn delete(
        &self,
        tenant: &str,
        entity_type: &str,
        entity_key: &str,
        contract: &ContractRef,
    ) -> Result<IngestOutcome, PropagationError> {
        let previous = self
            .mutations
            .get_latest(tenant, entity_key)
            .await?
            .ok_or_else(|| {
                ivm_storage::StorageError::NotFound(format!(
                    "{}:{}",
                    tenant, entity_key
                ))
            })?;

        let entity = EntityVersion::new(
            tenant,
            entity_type,
            entity_key,
            previous.version,
            Value::Null,
        );
        let change_set = self
            .derive_change_set(&entity, Some(&previous), None, contract)
            .await?;

        let entries = self.build_entries(&change_set, None).await?;
        let outcome = outcome_of(&change_set, entries.len());

        self.mutations
            .commit(MutationRecord {
                entity,
                change_set,
                entries,
            })
            .await?;

        info!(
            tenant,
            entity_key,
            change_set = %outcome.change_set_id,
            "Deletion committed"
        );
        Ok(outcome)
    }

    async fn derive_change_set(
        &self,
        entity: &EntityVersion,
        previous: Option<&EntityVersion>,
        to_payload: Option<&Value>,
        contract_ref: &ContractRef,
    ) -> Result<ChangeSet, PropagationError> {
        let change_set = ChangeSetBuilder::build(
            &entity.tenant,
            &entity.entity_type,
            &entity.entity_key,
            previous.map(|p| p.version),
            to_payload.map(|_| entity.version),
            previous.map(|p| &p.payload),
            to_payload,
        )?;

        let contract = self
            .registry
            .get(ContractKind::RuleSet, &contract_ref.id, &contract_ref.version)
            .await?;
        // Fail-closed: an unmapped path aborts here, before anything is
        // persisted.
        let impacts = impact::calculate(&change_set, &contract)?;
        debug!(
            change_set = %change_set.id,
            impacted = impacts.len(),
            "Impacts calculated"
        );
        Ok(ChangeSetBuilder::with_impacts(change_set, impacts))
    }

    /// One ARTIFACT_REBUILD entry per impacted artifact type, a SINK_SHIP
    /// entry per artifact type with configured sinks, and one WEBHOOK_NOTIFY
    /// entry when any webhook subscribes to the mutation's event type.
    async fn build_entries(
        &self,
        change_set: &ChangeSet,
        to_payload: Option<&Value>,
    ) -> Result<Vec<OutboxEntry>, PropagationError> {
        let aggregate_id = change_set.aggregate_id();
        let version = change_set
            .to_version
            .or(change_set.from_version)
            .unwrap_or(0);
        let mut entries = Vec::new();

        for (artifact_type, detail) in &change_set.impacts {
            let rebuild = ArtifactRebuildPayload {
                tenant: change_set.tenant.clone(),
                entity_type: change_set.entity_type.clone(),
                entity_key: change_set.entity_key.clone(),
                version,
                artifact_type: artifact_type.clone(),
                change_set_id: change_set.id.clone(),
                matched_paths: detail.matched_paths.iter().cloned().collect(),
            };
            entries.push(OutboxEntry::new(
                &change_set.entity_type,
                &aggregate_id,
                OutboxEventType::ArtifactRebuild,
                serde_json::to_value(&rebuild)
                    .map_err(ivm_storage::StorageError::from)?,
            ));

            if self
                .sinks
                .resolve(&change_set.entity_type, artifact_type)
                .is_empty()
            {
                continue;
            }
            let ship = SinkShipPayload {
                tenant: change_set.tenant.clone(),
                entity_type: change_set.entity_type.clone(),
                entity_key: change_set.entity_key.clone(),
                version,
                artifact_type: artifact_type.clone(),
                change_set_id: change_set.id.clone(),
                change_type: change_set.change_type,
                payload: to_payload.cloned(),
            };
            entries.push(OutboxEntry::new(
                &change_set.entity_type,
                &aggregate_id,
                OutboxEventType::SinkShip,
                serde_json::to_value(&ship)
                    .map_err(ivm_storage::StorageError::from)?,
            ));
        }

        let event_type = event_type_of(change_set.change_type);
        let subscribed = self.webhooks.list_for_event(event_type).await?;
        if !subscribed.is_empty() {
            let notify = WebhookNotifyPayload {
                event_type: event_type.to_string(),
                body: json!({
                    "tenant": change_set.tenant,
                    "entity_type": change_set.entity_type,
                    "entity_key": change_set.entity_key,
                    "change_set_id": change_set.id,
                    "change_type": change_set.change_type,
                    "from_version": change_set.from_version,
                    "to_version": change_set.to_version,
                    "impacted_artifact_types": change_set.impacted_types(),
                }),
            };
            entries.push(OutboxEntry::new(
                &change_set.entity_type,
                &aggregate_id,
                OutboxEventType::WebhookNotify,
                serde_json::to_value(&notify)
                    .map_err(ivm_storage::StorageError::from)?,
            ));
        }

        Ok(entries)
    }
}

fn event_type_of(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::Create => "entity.created",
        ChangeType::Update => "entity.updated",
        ChangeType::Delete => "entity.deleted",
    }
}

fn outcome_of(change_set: &ChangeSet, outbox_entries: usize) -> IngestOutcome {
    IngestOutcome {
        change_set_id: change_set.id.clone(),
        change_type: change_set.change_type,
        version: change_set.to_version,
        impacted_artifact_types: change_set
            .impacted_types()
            .into_iter()
            .collect(),
        outbox_entries,
    }
}
