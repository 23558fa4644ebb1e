use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::ArtifactType;

/// Routes (entity type, artifact type) to one or more sink destinations.
/// Several rules may fire for one artifact, producing fan-out shipping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkRule {
    pub entity_type: String,
    pub artifact_type: ArtifactType,
    pub sink_names: Vec<String>,
}

/// Outcome of a single ship. `Superseded` means a newer version already
/// landed at the destination and the write was a deliberate no-op.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShipResult {
    #[serde(rename = "SHIPPED")]
    Shipped,
    #[serde(rename = "SUPERSEDED")]
    Superseded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShipItem {
    pub entity_key: String,
    pub version: u64,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BatchShipResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub failed_keys: Vec<String>,
}

impl BatchShipResult {
    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, key: impl Into<String>) {
        self.failed_count += 1;
        self.failed_keys.push(key.into());
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failed_count
    }
}
