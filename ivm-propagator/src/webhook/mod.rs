pub mod circuit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ivm_models::{DeliveryStatus, Webhook, WebhookDelivery};
use ivm_storage::{DeliveryStorage, WebhookStorage};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::errors::WebhookError;

pub use circuit::{Admission, CircuitBreaker, CircuitState};

/// Seam between the dispatcher and the wire so delivery policy (retry,
/// breaker, audit records) can be exercised without sockets.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Delivers one event; returns the response status code on success.
    async fn deliver(
        &self,
        webhook: &Webhook,
        event_type: &str,
        payload: &Value,
    ) -> Result<u16, WebhookError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(
        &self,
        webhook: &Webhook,
        event_type: &str,
        payload: &Value,
    ) -> Result<u16, WebhookError> {
        let mut request = self
            .client
            .post(&webhook.url)
            .header("x-ivm-event", event_type)
            .json(payload);
        for (name, value) in &webhook.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout
            } else {
                WebhookError::Request(e)
            }
        })?;

        let code = response.status().as_u16();
        match code {
            200..=299 => Ok(code),
            429 => Err(WebhookError::RateLimited),
            _ => Err(WebhookError::Status(code)),
        }
    }
}

/// Delivers event notifications to registered endpoints with
/// exponential-backoff retry and a per-endpoint circuit breaker. Every
/// attempt, retried or not, appends its own immutable delivery record.
pub struct WebhookDispatcher {
    webhooks: Arc<dyn WebhookStorage>,
    deliveries: Arc<dyn DeliveryStorage>,
    transport: Arc<dyn WebhookTransport>,
    breakers: RwLock<HashMap<Uuid, Arc<CircuitBreaker>>>,
}

impl WebhookDispatcher {
    pub fn new(
        webhooks: Arc<dyn WebhookStorage>,
        deliveries: Arc<dyn DeliveryStorage>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            webhooks,
            deliveries,
            transport,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Fans an event out to every subscribed webhook. Returns an error when
    /// any endpoint ended in a non-success terminal state, so the outbox
    /// entry driving this dispatch is retried later.
    pub async fn dispatch_event(
        &self,
        event_type: &str,
        payload: &Value,
    ) -> Result<(), WebhookError> {
        let subscribers = self.webhooks.list_for_event(event_type).await?;
        if subscribers.is_empty() {
            debug!(event_type, "No webhooks subscribed");
            return Ok(());
        }

        let mut first_failure = None;
        for webhook in subscribers {
            if let Err(e) =
                self.deliver_with_retry(&webhook, event_type, payload).await
            {
                warn!(webhook = %webhook.id, event_type, error = %e, "Webhook delivery failed");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn deliver_with_retry(
        &self,
        webhook: &Webhook,
        event_type: &str,
        payload: &Value,
    ) -> Result<(), WebhookError> {
        let breaker = self.breaker_for(webhook).await;
        let policy = &webhook.retry_policy;

        let mut attempt: u32 = 0;
        loop {
            match breaker.admit() {
                Admission::ShortCircuit => {
                    // No network call while the circuit is open.
                    self.append_delivery(
                        webhook,
                        event_type,
                        DeliveryStatus::CircuitOpen,
                        None,
                        None,
                        attempt + 1,
                    )
                    .await?;
                    return Err(WebhookError::CircuitOpen(
                        webhook.id.to_string(),
                    ));
                }
                Admission::Allow | Admission::Probe => {}
            }

            let started = Instant::now();
            let outcome = self
                .transport
                .deliver(webhook, event_type, payload)
                .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(code) => {
                    breaker.record_success();
                    self.append_delivery(
                        webhook,
                        event_type,
                        DeliveryStatus::Success,
                        Some(code),
                        Some(latency_ms),
                        attempt + 1,
                    )
                    .await?;
                    return Ok(());
                }
                Err(err) => {
                    breaker.record_failure();
                    let exhausted = attempt >= policy.max_retries;
                    // The last audit record is terminal even for a 429.
                    let status = match &err {
                        _ if exhausted => DeliveryStatus::Failed,
                        WebhookError::RateLimited => {
                            DeliveryStatus::RateLimited
                        }
                        _ => DeliveryStatus::Retrying,
                    };
                    let code = match &err {
                        WebhookError::RateLimited => Some(429),
                        WebhookError::Status(c) => Some(*c),
                        _ => None,
                    };
                    self.append_delivery(
                        webhook,
                        event_type,
                        status,
                        code,
                        Some(latency_ms),
                        attempt + 1,
                    )
                    .await?;

                    if exhausted {
                        return Err(WebhookError::RetriesExhausted(
                            attempt + 1,
                        ));
                    }
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Manual probe outside the automatic retry flow; still audited and
    /// still feeds the breaker.
    pub async fn test_delivery(
        &self,
        webhook_id: Uuid,
    ) -> Result<WebhookDelivery, WebhookError> {
        let webhook = self
            .webhooks
            .get(webhook_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(webhook_id.to_string()))?;
        let breaker = self.breaker_for(&webhook).await;

        let payload = serde_json::json!({
            "test": true,
            "webhook_id": webhook.id,
        });
        let started = Instant::now();
        let outcome = self
            .transport
            .deliver(&webhook, "webhook.test", &payload)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let delivery = match outcome {
            Ok(code) => {
                breaker.record_success();
                WebhookDelivery::record(
                    webhook.id,
                    "webhook.test",
                    DeliveryStatus::Success,
                    Some(code),
                    Some(latency_ms),
                    1,
                )
            }
            Err(err) => {
                breaker.record_failure();
                let code = match &err {
                    WebhookError::RateLimited => Some(429),
                    WebhookError::Status(c) => Some(*c),
                    _ => None,
                };
                WebhookDelivery::record(
                    webhook.id,
                    "webhook.test",
                    DeliveryStatus::Failed,
                    code,
                    Some(latency_ms),
                    1,
                )
            }
        };
        self.deliveries.append(&delivery).await?;
        info!(webhook = %webhook.id, status = ?delivery.status, "Webhook test delivery");
        Ok(delivery)
    }

    pub async fn circuit_state(
        &self,
        webhook_id: Uuid,
    ) -> Result<CircuitState, WebhookError> {
        let webhook = self
            .webhooks
            .get(webhook_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(webhook_id.to_string()))?;
        Ok(self.breaker_for(&webhook).await.state())
    }

    pub async fn reset_circuit(
        &self,
        webhook_id: Uuid,
    ) -> Result<(), WebhookError> {
        let webhook = self
            .webhooks
            .get(webhook_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(webhook_id.to_string()))?;
        self.breaker_for(&webhook).await.reset();
        info!(webhook = %webhook_id, "Circuit breaker reset");
        Ok(())
    }

    async fn breaker_for(&self, webhook: &Webhook) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(&webhook.id) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(webhook.id)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    webhook.circuit_failure_threshold,
                    std::time::Duration::from_secs(
                        webhook.circuit_cool_down_secs,
                    ),
                ))
            })
            .clone()
    }

    async fn append_delivery(
        &self,
        webhook: &Webhook,
        event_type: &str,
        status: DeliveryStatus,
        response_code: Option<u16>,
        latency_ms: Option<u64>,
        attempt: u32,
    ) -> Result<(), WebhookError> {
        let delivery = WebhookDelivery::record(
            webhook.id,
            event_type,
            status,
            response_code,
            latency_ms,
            attempt,
        );
        self.deliveries.append(&delivery).await?;
        Ok(())
    }
}
