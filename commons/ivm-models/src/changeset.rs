use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::ArtifactType;
use crate::hash::{absent_payload_hash, payload_hash, sha256_hex};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

/// Why an artifact type is affected: the subset of changed paths that
/// matched one of its rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImpactDetail {
    pub matched_paths: BTreeSet<String>,
    pub matched_rules: BTreeSet<String>,
}

/// Immutable record of one entity mutation's effect. The id is a pure
/// function of the mutation's identity, so re-deriving the same mutation
/// yields the same record and downstream writes stay idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    pub id: String,
    pub tenant: String,
    pub entity_type: String,
    pub entity_key: String,
    pub from_version: Option<u64>,
    pub to_version: Option<u64>,
    pub change_type: ChangeType,
    pub changed_paths: BTreeSet<String>,
    pub impacts: BTreeMap<ArtifactType, ImpactDetail>,
}

impl ChangeSet {
    /// Deterministic identity: SHA-256 over the tuple
    /// (tenant, entityKey, fromVersion, toVersion, hash(from), hash(to)).
    pub fn derive_id(
        tenant: &str,
        entity_key: &str,
        from_version: Option<u64>,
        to_version: Option<u64>,
        from_payload: Option<&Value>,
        to_payload: Option<&Value>,
    ) -> String {
        let from_hash = from_payload
            .map(payload_hash)
            .unwrap_or_else(absent_payload_hash);
        let to_hash = to_payload
            .map(payload_hash)
            .unwrap_or_else(absent_payload_hash);
        let material = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            tenant,
            entity_key,
            from_version.map(|v| v.to_string()).unwrap_or_default(),
            to_version.map(|v| v.to_string()).unwrap_or_default(),
            from_hash,
            to_hash,
        );
        sha256_hex(material.as_bytes())
    }

    pub fn aggregate_id(&self) -> String {
        format!("{}:{}", self.tenant, self.entity_key)
    }

    pub fn impacted_types(&self) -> BTreeSet<ArtifactType> {
        self.impacts.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_is_deterministic() {
        let from = json!({"price": 100});
        let to = json!({"price": 120});
        let a = ChangeSet::derive_id(
            "acme",
            "SKU-1",
            Some(1),
            Some(2),
            Some(&from),
            Some(&to),
        );
        let b = ChangeSet::derive_id(
            "acme",
            "SKU-1",
            Some(1),
            Some(2),
            Some(&from),
            Some(&to),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn id_varies_with_payload() {
        let from = json!({"price": 100});
        let a = ChangeSet::derive_id(
            "acme",
            "SKU-1",
            Some(1),
            Some(2),
            Some(&from),
            Some(&json!({"price": 120})),
        );
        let b = ChangeSet::derive_id(
            "acme",
            "SKU-1",
            Some(1),
            Some(2),
            Some(&from),
            Some(&json!({"price": 121})),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn create_and_delete_ids_differ() {
        let payload = json!({"name": "A"});
        let create = ChangeSet::derive_id(
            "acme",
            "SKU-1",
            None,
            Some(1),
            None,
            Some(&payload),
        );
        let delete = ChangeSet::derive_id(
            "acme",
            "SKU-1",
            Some(1),
            None,
            Some(&payload),
            None,
        );
        assert_ne!(create, delete);
    }
}
