use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationError;

/// Exponential-backoff policy owned by a webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based):
    /// min(initial * multiplier^attempt, max).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    pub event_types: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_cool_down_secs")]
    pub circuit_cool_down_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cool_down_secs() -> u64 {
    60
}

impl Webhook {
    pub fn new(
        url: impl Into<String>,
        event_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            headers: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_cool_down_secs: default_cool_down_secs(),
        }
    }

    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|e| e == event_type)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://"))
        {
            return Err(ValidationError::InvalidWebhookUrl(self.url.clone()));
        }
        if self.event_types.is_empty() {
            return Err(ValidationError::EmptyEventTypes);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "RETRYING")]
    Retrying,
    #[serde(rename = "CIRCUIT_OPEN")]
    CircuitOpen,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
}

/// Append-only audit record for one delivery attempt. Never mutated after
/// creation; a retried attempt gets its own record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub response_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn record(
        webhook_id: Uuid,
        event_type: impl Into<String>,
        status: DeliveryStatus,
        response_code: Option<u16>,
        latency_ms: Option<u64>,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            event_type: event_type.into(),
            status,
            response_code,
            latency_ms,
            attempt,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(9), Duration::from_millis(1_000));
    }

    #[test]
    fn webhook_validation() {
        let mut hook = Webhook::new("https://example.com/hook", ["entity.updated"]);
        assert!(hook.validate().is_ok());
        hook.url = "ftp://example.com".into();
        assert!(hook.validate().is_err());
        hook.url = "https://example.com".into();
        hook.event_types.clear();
        assert!(hook.validate().is_err());
    }
}
