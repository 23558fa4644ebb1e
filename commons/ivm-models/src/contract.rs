use serde::{Deserialize, Serialize};

use crate::hash::sha256_hex;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ContractKind {
    #[serde(rename = "RULE_SET")]
    RuleSet,
    #[serde(rename = "VIEW_DEFINITION")]
    ViewDefinition,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::RuleSet => "ruleset",
            ContractKind::ViewDefinition => "viewdef",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContractStatus {
    #[serde(rename = "DRAFT")]
    Draft,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "DEPRECATED")]
    Deprecated,
    #[serde(rename = "ARCHIVED")]
    Archived,
}

impl Default for ContractStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// A derived-artifact type named by a contract's impact map, e.g. "CORE",
/// "SEARCH", "RECOMMENDATION".
pub type ArtifactType = String;

/// One impact-map rule: a structural path pattern and the artifact types it
/// affects. Patterns are `/`-separated pointers where a segment may be `*`
/// (exactly one segment) or `**` (the remainder of the path).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactRule {
    pub path_pattern: String,
    pub affected: Vec<ArtifactType>,
}

impl ImpactRule {
    pub fn new(
        pattern: impl Into<String>,
        affected: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            path_pattern: pattern.into(),
            affected: affected.into_iter().map(Into::into).collect(),
        }
    }
}

/// A versioned declarative contract. Immutable once published; the checksum
/// is verified against the stored value on every registry load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub kind: ContractKind,
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub status: ContractStatus,
    pub impact_map: Vec<ImpactRule>,
    pub checksum: String,
}

impl Contract {
    /// Build a contract and stamp its checksum from the impact map.
    pub fn sealed(
        kind: ContractKind,
        id: impl Into<String>,
        version: impl Into<String>,
        status: ContractStatus,
        impact_map: Vec<ImpactRule>,
    ) -> Self {
        let mut contract = Self {
            kind,
            id: id.into(),
            version: version.into(),
            status,
            impact_map,
            checksum: String::new(),
        };
        contract.checksum = contract.compute_checksum();
        contract
    }

    /// Cache key used by the registry: `kind:id@version`.
    pub fn cache_key(&self) -> String {
        contract_cache_key(self.kind, &self.id, &self.version)
    }

    /// Checksum over the canonical JSON of the impact map. The contract
    /// body is the only integrity-bearing content; status is lifecycle
    /// metadata and may change without republishing.
    pub fn compute_checksum(&self) -> String {
        let body = serde_json::json!({
            "kind": self.kind,
            "id": self.id,
            "version": self.version,
            "impact_map": self.impact_map,
        });
        sha256_hex(body.to_string().as_bytes())
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Only ACTIVE and DEPRECATED contracts drive live impact calculation.
    pub fn usable_for_impact(&self) -> bool {
        matches!(
            self.status,
            ContractStatus::Active | ContractStatus::Deprecated
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyContractId);
        }
        if self.version.is_empty() {
            return Err(ValidationError::EmptyContractVersion);
        }
        if self.impact_map.is_empty() {
            return Err(ValidationError::EmptyImpactMap);
        }
        for rule in &self.impact_map {
            if rule.affected.is_empty() {
                return Err(ValidationError::EmptyRuleTargets(
                    rule.path_pattern.clone(),
                ));
            }
            validate_path_pattern(&rule.path_pattern)?;
        }
        Ok(())
    }
}

pub fn contract_cache_key(
    kind: ContractKind,
    id: &str,
    version: &str,
) -> String {
    format!("{}:{}@{}", kind.as_str(), id, version)
}

fn validate_path_pattern(pattern: &str) -> Result<(), ValidationError> {
    if !pattern.starts_with('/') {
        return Err(ValidationError::InvalidPathPattern(
            pattern.to_string(),
            "must start with '/'".to_string(),
        ));
    }
    let segments: Vec<&str> = pattern[1..].split('/').collect();
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            return Err(ValidationError::InvalidPathPattern(
                pattern.to_string(),
                "empty segment".to_string(),
            ));
        }
        if *seg == "**" && i != segments.len() - 1 {
            return Err(ValidationError::InvalidPathPattern(
                pattern.to_string(),
                "'**' is only valid as the final segment".to_string(),
            ));
        }
    }
    Ok(())
}
