use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::ValidationError;

/// One durably written version of a source entity. The payload is a
/// normalized, tree-structured document; version numbers are monotonically
/// increasing per (tenant, entity key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityVersion {
    pub tenant: String,
    pub entity_type: String,
    pub entity_key: String,
    pub version: u64,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl EntityVersion {
    pub fn new(
        tenant: impl Into<String>,
        entity_type: impl Into<String>,
        entity_key: impl Into<String>,
        version: u64,
        payload: Value,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            entity_type: entity_type.into(),
            entity_key: entity_key.into(),
            version,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tenant.is_empty() {
            return Err(ValidationError::EmptyTenant);
        }
        if self.entity_key.is_empty() {
            return Err(ValidationError::EmptyEntityKey);
        }
        if self.tenant.contains(':') || self.entity_key.contains(':') {
            return Err(ValidationError::ReservedSeparator);
        }
        if self.version == 0 {
            return Err(ValidationError::ZeroVersion);
        }
        Ok(())
    }

    /// Aggregate identifier shared with the outbox: `tenant:entityKey`.
    pub fn aggregate_id(&self) -> String {
        format!("{}:{}", self.tenant, self.entity_key)
    }
}
