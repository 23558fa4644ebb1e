use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Retry budget before an entry is dead-lettered.
pub const MAX_RETRY_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSED")]
    Processed,
    #[serde(rename = "FAILED")]
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OutboxEventType {
    #[serde(rename = "ARTIFACT_REBUILD")]
    ArtifactRebuild,
    #[serde(rename = "SINK_SHIP")]
    SinkShip,
    #[serde(rename = "WEBHOOK_NOTIFY")]
    WebhookNotify,
}

/// One pending side effect. The id is random because each row is a
/// per-attempt record, not a logical-change identity (that is the
/// ChangeSet's job).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub aggregate_type: String,
    /// `tenant:entityKey`; exactly one separator.
    pub aggregate_id: String,
    pub event_type: OutboxEventType,
    pub payload: Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
}

impl OutboxEntry {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: OutboxEventType,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type,
            payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            claimed_at: None,
            claimed_by: None,
        }
    }

    /// False once the retry budget is exhausted; such entries are terminal
    /// and only reachable through the explicit dead-letter replay path.
    pub fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRY_COUNT
    }

    pub fn is_dead_letter(&self) -> bool {
        self.status == OutboxStatus::Failed && !self.can_retry()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some() && self.status == OutboxStatus::Pending
    }

    /// Splits `tenant:entityKey`, rejecting malformed aggregate ids.
    pub fn parse_aggregate_id(&self) -> Option<(&str, &str)> {
        parse_aggregate_id(&self.aggregate_id)
    }
}

pub fn parse_aggregate_id(aggregate_id: &str) -> Option<(&str, &str)> {
    let mut parts = aggregate_id.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tenant), Some(key), None)
            if !tenant.is_empty() && !key.is_empty() =>
        {
            Some((tenant, key))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_budget() {
        let mut entry = OutboxEntry::new(
            "entity",
            "acme:SKU-1",
            OutboxEventType::SinkShip,
            json!({}),
        );
        assert!(entry.can_retry());
        entry.retry_count = MAX_RETRY_COUNT;
        assert!(!entry.can_retry());
        entry.status = OutboxStatus::Failed;
        assert!(entry.is_dead_letter());
    }

    #[test]
    fn aggregate_id_must_have_one_separator() {
        assert_eq!(parse_aggregate_id("acme:SKU-1"), Some(("acme", "SKU-1")));
        assert_eq!(parse_aggregate_id("acme"), None);
        assert_eq!(parse_aggregate_id("acme:SKU:1"), None);
        assert_eq!(parse_aggregate_id(":SKU-1"), None);
    }
}
