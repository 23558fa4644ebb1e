// Webhook delivery policy: retry backoff, audit records, circuit breaking.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ivm_models::{DeliveryStatus, RetryPolicy, Webhook};
use ivm_propagator::errors::WebhookError;
use ivm_propagator::webhook::{
    CircuitState, WebhookDispatcher, WebhookTransport,
};
use ivm_storage::memory::MemoryStorageFactory;
use ivm_storage::{DeliveryStorage, StorageFactory, WebhookStorage};
use serde_json::{Value, json};

/// Scripted transport: fails the first `fail_first` calls with the given
/// status, then succeeds. Counts every call it receives.
struct ScriptedTransport {
    calls: AtomicUsize,
    fail_first: usize,
    failure_status: u16,
}

impl ScriptedTransport {
    fn succeeding() -> Self {
        Self::failing_first(0, 500)
    }

    fn failing_first(fail_first: usize, failure_status: u16) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
            failure_status,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn deliver(
        &self,
        _webhook: &Webhook,
        _event_type: &str,
        _payload: &Value,
    ) -> Result<u16, WebhookError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            match self.failure_status {
                429 => Err(WebhookError::RateLimited),
                code => Err(WebhookError::Status(code)),
            }
        } else {
            Ok(200)
        }
    }
}

struct Fixture {
    dispatcher: WebhookDispatcher,
    webhooks: Arc<dyn WebhookStorage>,
    deliveries: Arc<dyn DeliveryStorage>,
    transport: Arc<ScriptedTransport>,
}

fn fixture(transport: ScriptedTransport) -> Fixture {
    let factory = MemoryStorageFactory::new();
    let webhooks: Arc<dyn WebhookStorage> =
        Arc::new(factory.create_webhook_storage());
    let deliveries: Arc<dyn DeliveryStorage> =
        Arc::new(factory.create_delivery_storage());
    let transport = Arc::new(transport);
    let dispatcher = WebhookDispatcher::new(
        webhooks.clone(),
        deliveries.clone(),
        transport.clone(),
    );
    Fixture {
        dispatcher,
        webhooks,
        deliveries,
        transport,
    }
}

fn fast_webhook(max_retries: u32, failure_threshold: u32) -> Webhook {
    let mut webhook =
        Webhook::new("https://example.com/hook", ["entity.updated"]);
    webhook.retry_policy = RetryPolicy {
        max_retries,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2.0,
    };
    webhook.circuit_failure_threshold = failure_threshold;
    webhook
}

#[tokio::test]
async fn success_appends_one_delivery_record() -> Result<()> {
    let f = fixture(ScriptedTransport::succeeding());
    let webhook = fast_webhook(3, 5);
    f.webhooks.store(&webhook).await?;

    f.dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await?;

    let records = f.deliveries.list_for_webhook(webhook.id, 10).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Success);
    assert_eq!(records[0].response_code, Some(200));
    assert_eq!(records[0].attempt, 1);
    assert_eq!(f.transport.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn transient_failure_retries_with_its_own_record() -> Result<()> {
    let f = fixture(ScriptedTransport::failing_first(1, 500));
    let webhook = fast_webhook(3, 10);
    f.webhooks.store(&webhook).await?;

    f.dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await?;

    let mut records = f.deliveries.list_for_webhook(webhook.id, 10).await?;
    records.sort_by_key(|r| r.attempt);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, DeliveryStatus::Retrying);
    assert_eq!(records[0].response_code, Some(500));
    assert_eq!(records[1].status, DeliveryStatus::Success);
    assert_eq!(f.transport.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_end_terminal_failed() -> Result<()> {
    let f = fixture(ScriptedTransport::failing_first(usize::MAX, 500));
    let webhook = fast_webhook(2, 10);
    f.webhooks.store(&webhook).await?;

    let err = f
        .dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::RetriesExhausted(3)));

    let mut records = f.deliveries.list_for_webhook(webhook.id, 10).await?;
    records.sort_by_key(|r| r.attempt);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, DeliveryStatus::Retrying);
    assert_eq!(records[1].status, DeliveryStatus::Retrying);
    assert_eq!(records[2].status, DeliveryStatus::Failed);
    assert_eq!(f.transport.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn rate_limited_attempts_end_terminal_failed() -> Result<()> {
    let f = fixture(ScriptedTransport::failing_first(usize::MAX, 429));
    let webhook = fast_webhook(1, 10);
    f.webhooks.store(&webhook).await?;

    let err = f
        .dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::RetriesExhausted(2)));

    let mut records = f.deliveries.list_for_webhook(webhook.id, 10).await?;
    records.sort_by_key(|r| r.attempt);
    assert_eq!(records.len(), 2);
    // Intermediate 429s are audited as rate limited; the last attempt is
    // terminal regardless of the failure kind.
    assert_eq!(records[0].status, DeliveryStatus::RateLimited);
    assert_eq!(records[0].response_code, Some(429));
    assert_eq!(records[1].status, DeliveryStatus::Failed);
    assert_eq!(records[1].response_code, Some(429));
    Ok(())
}

#[tokio::test]
async fn open_circuit_short_circuits_without_transport_calls() -> Result<()> {
    let f = fixture(ScriptedTransport::failing_first(usize::MAX, 500));
    // Two single-attempt dispatches open the breaker.
    let webhook = fast_webhook(0, 2);
    f.webhooks.store(&webhook).await?;

    for _ in 0..2 {
        let _ = f
            .dispatcher
            .dispatch_event("entity.updated", &json!({"x": 1}))
            .await;
    }
    assert_eq!(
        f.dispatcher.circuit_state(webhook.id).await?,
        CircuitState::Open
    );
    let calls_before = f.transport.calls();

    let err = f
        .dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::CircuitOpen(_)));
    assert_eq!(f.transport.calls(), calls_before);

    let records = f.deliveries.list_for_webhook(webhook.id, 10).await?;
    let open_records: Vec<_> = records
        .iter()
        .filter(|r| r.status == DeliveryStatus::CircuitOpen)
        .collect();
    assert_eq!(open_records.len(), 1);
    assert_eq!(open_records[0].response_code, None);
    Ok(())
}

#[tokio::test]
async fn cool_down_probe_closes_the_circuit_on_success() -> Result<()> {
    let f = fixture(ScriptedTransport::failing_first(2, 500));
    let mut webhook = fast_webhook(0, 2);
    webhook.circuit_cool_down_secs = 1;
    f.webhooks.store(&webhook).await?;

    for _ in 0..2 {
        let _ = f
            .dispatcher
            .dispatch_event("entity.updated", &json!({"x": 1}))
            .await;
    }
    assert_eq!(
        f.dispatcher.circuit_state(webhook.id).await?,
        CircuitState::Open
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // The transport has healed; the half-open probe succeeds and closes
    // the breaker.
    f.dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await?;
    assert_eq!(
        f.dispatcher.circuit_state(webhook.id).await?,
        CircuitState::Closed
    );
    Ok(())
}

#[tokio::test]
async fn reset_closes_the_circuit_and_readmits_traffic() -> Result<()> {
    let f = fixture(ScriptedTransport::failing_first(2, 500));
    let webhook = fast_webhook(0, 2);
    f.webhooks.store(&webhook).await?;

    for _ in 0..2 {
        let _ = f
            .dispatcher
            .dispatch_event("entity.updated", &json!({"x": 1}))
            .await;
    }
    assert_eq!(
        f.dispatcher.circuit_state(webhook.id).await?,
        CircuitState::Open
    );

    f.dispatcher.reset_circuit(webhook.id).await?;
    assert_eq!(
        f.dispatcher.circuit_state(webhook.id).await?,
        CircuitState::Closed
    );

    // Transport now succeeds; delivery goes through.
    f.dispatcher
        .dispatch_event("entity.updated", &json!({"x": 1}))
        .await?;
    Ok(())
}

#[tokio::test]
async fn dispatch_skips_unsubscribed_webhooks() -> Result<()> {
    let f = fixture(ScriptedTransport::succeeding());
    let webhook = fast_webhook(0, 5);
    f.webhooks.store(&webhook).await?;

    f.dispatcher
        .dispatch_event("entity.deleted", &json!({"x": 1}))
        .await?;
    assert_eq!(f.transport.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn manual_test_delivery_is_audited() -> Result<()> {
    let f = fixture(ScriptedTransport::succeeding());
    let webhook = fast_webhook(0, 5);
    f.webhooks.store(&webhook).await?;

    let delivery = f.dispatcher.test_delivery(webhook.id).await?;
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.event_type, "webhook.test");

    let records = f.deliveries.list_for_webhook(webhook.id, 10).await?;
    assert_eq!(records.len(), 1);
    Ok(())
}
