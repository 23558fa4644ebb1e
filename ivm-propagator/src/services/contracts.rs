use std::collections::{BTreeMap, BTreeSet};

use ivm_models::{
    ArtifactType, ChangeType, Contract, ImpactDetail,
};
use serde::Serialize;
use serde_json::Value;

use crate::changeset::{ChangeSetBuilder, changed_path_set};
use crate::errors::{ImpactError, PropagationError};
use crate::impact;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub checksum_valid: bool,
    pub usable_for_impact: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub change_type: Option<ChangeType>,
    pub changed_paths: BTreeSet<String>,
}

/// Dry-run of a contract against a hypothetical mutation. Unmapped paths are
/// reported, not errors; the whole point of simulation is seeing the gaps
/// before a contract goes live.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub changed_paths: BTreeSet<String>,
    pub impacts: BTreeMap<ArtifactType, ImpactDetail>,
    pub unmapped_paths: Vec<String>,
}

/// Stateless contract authoring tools behind the API: structural validation,
/// payload diffing and impact simulation. Pure library calls into the
/// builder and calculator.
pub struct ContractToolsService;

impl ContractToolsService {
    pub fn validate(contract: &Contract) -> ValidationReport {
        let mut errors = Vec::new();
        if let Err(e) = contract.validate() {
            errors.push(e.to_string());
        }
        let checksum_valid = contract.verify_checksum();
        if !checksum_valid {
            errors.push(format!(
                "checksum mismatch: stored {}, computed {}",
                contract.checksum,
                contract.compute_checksum()
            ));
        }
        ValidationReport {
            valid: errors.is_empty(),
            checksum_valid,
            usable_for_impact: contract.usable_for_impact(),
            errors,
        }
    }

    pub fn diff(from: Option<&Value>, to: Option<&Value>) -> DiffReport {
        let change_type = match (from, to) {
            (None, None) => None,
            (None, Some(_)) => Some(ChangeType::Create),
            (Some(_), None) => Some(ChangeType::Delete),
            (Some(_), Some(_)) => Some(ChangeType::Update),
        };
        DiffReport {
            change_type,
            changed_paths: changed_path_set(from, to),
        }
    }

    pub fn simulate(
        contract: &Contract,
        from: Option<&Value>,
        to: Option<&Value>,
    ) -> Result<SimulationReport, PropagationError> {
        let from_version = from.map(|_| 1);
        let to_version = match (from, to) {
            (Some(_), Some(_)) => Some(2),
            (None, Some(_)) => Some(1),
            _ => None,
        };
        let change_set = ChangeSetBuilder::build(
            "simulation",
            &contract.id,
            "probe",
            from_version,
            to_version,
            from,
            to,
        )?;

        match impact::calculate(&change_set, contract) {
            Ok(impacts) => Ok(SimulationReport {
                changed_paths: change_set.changed_paths,
                impacts,
                unmapped_paths: Vec::new(),
            }),
            Err(ImpactError::UnmappedPaths(unmapped)) => {
                Ok(SimulationReport {
                    changed_paths: change_set.changed_paths,
                    impacts: BTreeMap::new(),
                    unmapped_paths: unmapped,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_models::{ContractKind, ContractStatus, ImpactRule};
    use serde_json::json;

    fn contract() -> Contract {
        Contract::sealed(
            ContractKind::RuleSet,
            "product-rules",
            "1.0.0",
            ContractStatus::Active,
            vec![
                ImpactRule::new("/price", ["CORE", "SEARCH"]),
                ImpactRule::new("/meta/**", ["SEARCH"]),
            ],
        )
    }

    #[test]
    fn validate_reports_tampering() {
        let mut c = contract();
        c.impact_map.push(ImpactRule::new("/name", ["CORE"]));
        let report = ContractToolsService::validate(&c);
        assert!(!report.valid);
        assert!(!report.checksum_valid);
    }

    #[test]
    fn diff_classifies_change_type() {
        let report = ContractToolsService::diff(
            Some(&json!({"price": 100})),
            Some(&json!({"price": 120})),
        );
        assert_eq!(report.change_type, Some(ChangeType::Update));
        assert!(report.changed_paths.contains("/price"));
    }

    #[test]
    fn simulate_surfaces_unmapped_paths() {
        let report = ContractToolsService::simulate(
            &contract(),
            Some(&json!({"price": 100, "stock": 5})),
            Some(&json!({"price": 120, "stock": 4})),
        )
        .expect("simulates");
        assert_eq!(report.unmapped_paths, vec!["/stock".to_string()]);
        assert!(report.impacts.is_empty());
    }

    #[test]
    fn simulate_maps_covered_paths() {
        let report = ContractToolsService::simulate(
            &contract(),
            Some(&json!({"price": 100})),
            Some(&json!({"price": 120})),
        )
        .expect("simulates");
        assert!(report.unmapped_paths.is_empty());
        assert!(report.impacts.contains_key("CORE"));
        assert!(report.impacts.contains_key("SEARCH"));
    }
}
