// End-to-end ingest flow: derivation, fail-closed aborts, atomic commit.
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ivm_models::{
    ChangeType, Contract, ContractKind, ContractStatus, ImpactRule,
    OutboxEventType, SinkRule, Webhook,
};
use ivm_propagator::bootstrap::{Components, build_components};
use ivm_propagator::config::AppConfig;
use ivm_propagator::errors::{
    ChangeSetError, ImpactError, PropagationError, WebhookError,
};
use ivm_propagator::registry::StaticContractLoader;
use ivm_propagator::sinks::{MemorySearchSink, SinkShipper};
use ivm_propagator::services::ContractRef;
use ivm_propagator::webhook::WebhookTransport;
use serde_json::{Value, json};

struct OkTransport;

#[async_trait]
impl WebhookTransport for OkTransport {
    async fn deliver(
        &self,
        _webhook: &Webhook,
        _event_type: &str,
        _payload: &Value,
    ) -> Result<u16, WebhookError> {
        Ok(200)
    }
}

fn product_contract() -> Contract {
    Contract::sealed(
        ContractKind::RuleSet,
        "product-rules",
        "1.0.0",
        ContractStatus::Active,
        vec![
            ImpactRule::new("/name", ["CORE", "SEARCH"]),
            ImpactRule::new("/price", ["CORE"]),
            ImpactRule::new("/meta/**", ["SEARCH"]),
        ],
    )
}

fn contract_ref() -> ContractRef {
    ContractRef {
        id: "product-rules".to_string(),
        version: "1.0.0".to_string(),
    }
}

fn fixture() -> (Components, Arc<MemorySearchSink>) {
    let config = AppConfig::load_from_env().expect("defaults load");
    let loader = Arc::new(StaticContractLoader::new());
    loader.register(product_contract());
    let search = Arc::new(MemorySearchSink::new("search"));
    let components = build_components(
        &config,
        loader,
        vec![search.clone() as Arc<dyn SinkShipper>],
        vec![SinkRule {
            entity_type: "PRODUCT".to_string(),
            artifact_type: "SEARCH".to_string(),
            sink_names: vec!["search".to_string()],
        }],
        Arc::new(OkTransport),
    );
    (components, search)
}

#[tokio::test]
async fn create_commits_entity_changeset_and_outbox_atomically() -> Result<()>
{
    let (components, _) = fixture();
    let state = &components.state;

    let outcome = state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil", "price": 100}),
            &contract_ref(),
        )
        .await?;

    assert_eq!(outcome.change_type, ChangeType::Create);
    assert_eq!(outcome.version, Some(1));
    assert_eq!(
        outcome.impacted_artifact_types,
        vec!["CORE".to_string(), "SEARCH".to_string()]
    );

    let latest = state
        .mutation_storage
        .get_latest("acme", "SKU-1")
        .await?
        .expect("committed");
    assert_eq!(latest.version, 1);

    let sets = state
        .changeset_storage
        .list_for_entity("acme", "SKU-1")
        .await?;
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].id, outcome.change_set_id);

    // Two rebuild orders (CORE, SEARCH) plus one sink ship for SEARCH.
    let entries = state.outbox_service.list_recent(10).await?;
    assert_eq!(entries.len(), outcome.outbox_entries);
    let rebuilds = entries
        .iter()
        .filter(|e| e.event_type == OutboxEventType::ArtifactRebuild)
        .count();
    let ships = entries
        .iter()
        .filter(|e| e.event_type == OutboxEventType::SinkShip)
        .count();
    assert_eq!(rebuilds, 2);
    assert_eq!(ships, 1);
    Ok(())
}

#[tokio::test]
async fn unmapped_path_aborts_with_nothing_persisted() -> Result<()> {
    let (components, _) = fixture();
    let state = &components.state;

    let err = state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil", "stock": 7}),
            &contract_ref(),
        )
        .await
        .unwrap_err();
    match err {
        PropagationError::Impact(ImpactError::UnmappedPaths(paths)) => {
            assert_eq!(paths, vec!["/stock".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(
        state
            .mutation_storage
            .get_latest("acme", "SKU-1")
            .await?
            .is_none()
    );
    assert!(state.outbox_service.list_recent(10).await?.is_empty());
    assert!(
        state
            .changeset_storage
            .list_for_entity("acme", "SKU-1")
            .await?
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn version_gaps_are_conflicts() -> Result<()> {
    let (components, _) = fixture();
    let state = &components.state;

    state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil"}),
            &contract_ref(),
        )
        .await?;

    let err = state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            3,
            json!({"name": "Anvil Mk2"}),
            &contract_ref(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PropagationError::ChangeSet(ChangeSetError::VersionConflict {
            expected: 2,
            got: 3
        })
    ));
    Ok(())
}

#[tokio::test]
async fn update_only_carries_changed_paths() -> Result<()> {
    let (components, _) = fixture();
    let state = &components.state;

    state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil", "price": 100}),
            &contract_ref(),
        )
        .await?;
    let outcome = state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            2,
            json!({"name": "Anvil", "price": 120}),
            &contract_ref(),
        )
        .await?;

    assert_eq!(outcome.change_type, ChangeType::Update);
    // Only /price changed, so only CORE is impacted.
    assert_eq!(
        outcome.impacted_artifact_types,
        vec!["CORE".to_string()]
    );

    let sets = state
        .changeset_storage
        .list_for_entity("acme", "SKU-1")
        .await?;
    let update = sets.last().expect("update recorded");
    assert_eq!(
        update.changed_paths,
        std::collections::BTreeSet::from(["/price".to_string()])
    );
    Ok(())
}

#[tokio::test]
async fn delete_removes_the_lineage_and_propagates() -> Result<()> {
    let (components, _) = fixture();
    let state = &components.state;

    state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil"}),
            &contract_ref(),
        )
        .await?;
    let outcome = state
        .ingest_service
        .delete("acme", "PRODUCT", "SKU-1", &contract_ref())
        .await?;
    assert_eq!(outcome.change_type, ChangeType::Delete);

    assert!(
        state
            .mutation_storage
            .get_latest("acme", "SKU-1")
            .await?
            .is_none()
    );
    // Both the create and the delete ChangeSets survive as history.
    let sets = state
        .changeset_storage
        .list_for_entity("acme", "SKU-1")
        .await?;
    assert_eq!(sets.len(), 2);
    Ok(())
}

#[tokio::test]
async fn recreate_after_delete_recommits_the_mutation() -> Result<()> {
    let (components, _) = fixture();
    let state = &components.state;

    let payload = json!({"name": "Anvil", "price": 100});
    let first = state
        .ingest_service
        .ingest("acme", "PRODUCT", "SKU-1", 1, payload.clone(), &contract_ref())
        .await?;
    state
        .ingest_service
        .delete("acme", "PRODUCT", "SKU-1", &contract_ref())
        .await?;
    let entries_before = state.outbox_service.list_recent(50).await?.len();

    // Identical payload at version 1 derives the same ChangeSet id as the
    // original create. The mutation still has to land: the entity comes
    // back and fresh outbox entries are persisted.
    let second = state
        .ingest_service
        .ingest("acme", "PRODUCT", "SKU-1", 1, payload, &contract_ref())
        .await?;
    assert_eq!(second.change_set_id, first.change_set_id);
    assert_eq!(second.change_type, ChangeType::Create);

    let latest = state
        .mutation_storage
        .get_latest("acme", "SKU-1")
        .await?
        .expect("entity re-created");
    assert_eq!(latest.version, 1);

    let entries_after = state.outbox_service.list_recent(50).await?.len();
    assert_eq!(entries_after, entries_before + second.outbox_entries);
    assert!(second.outbox_entries > 0);
    Ok(())
}

#[tokio::test]
async fn draft_contract_rejects_mutations() -> Result<()> {
    let config = AppConfig::load_from_env()?;
    let loader = Arc::new(StaticContractLoader::new());
    loader.register(Contract::sealed(
        ContractKind::RuleSet,
        "product-rules",
        "1.0.0",
        ContractStatus::Draft,
        vec![ImpactRule::new("/name", ["CORE"])],
    ));
    let components = build_components(
        &config,
        loader,
        Vec::new(),
        Vec::new(),
        Arc::new(OkTransport),
    );

    let err = components
        .state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil"}),
            &contract_ref(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PropagationError::Impact(ImpactError::ContractStatus { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn webhook_subscription_adds_a_notify_entry() -> Result<()> {
    let (components, _) = fixture();
    let state = &components.state;

    let webhook =
        Webhook::new("https://example.com/hook", ["entity.created"]);
    state.webhook_storage.store(&webhook).await?;

    state
        .ingest_service
        .ingest(
            "acme",
            "PRODUCT",
            "SKU-1",
            1,
            json!({"name": "Anvil"}),
            &contract_ref(),
        )
        .await?;

    let entries = state.outbox_service.list_recent(10).await?;
    let notifies = entries
        .iter()
        .filter(|e| e.event_type == OutboxEventType::WebhookNotify)
        .count();
    assert_eq!(notifies, 1);
    Ok(())
}
