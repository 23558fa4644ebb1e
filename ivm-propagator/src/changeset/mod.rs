pub mod diff;

use std::collections::{BTreeMap, BTreeSet};

use ivm_models::{ChangeSet, ChangeType};
use serde_json::Value;

use crate::errors::ChangeSetError;

/// Builds immutable, deterministically-identified ChangeSets. Pure: no I/O,
/// no clock, no randomness; persistence belongs to the caller's unit of
/// work.
pub struct ChangeSetBuilder;

impl ChangeSetBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        tenant: &str,
        entity_type: &str,
        entity_key: &str,
        from_version: Option<u64>,
        to_version: Option<u64>,
        from_payload: Option<&Value>,
        to_payload: Option<&Value>,
    ) -> Result<ChangeSet, ChangeSetError> {
        let (change_type, changed_paths) = match (from_payload, to_payload) {
            (None, None) => return Err(ChangeSetError::NoPayloads),
            (None, Some(to)) => (ChangeType::Create, diff::all_paths(to)),
            (Some(from), None) => (ChangeType::Delete, diff::all_paths(from)),
            (Some(from), Some(to)) => {
                (ChangeType::Update, diff::changed_paths(from, to))
            }
        };

        if change_type == ChangeType::Update {
            let (Some(from_v), Some(to_v)) = (from_version, to_version) else {
                return Err(ChangeSetError::Invalid(
                    "updates carry both version numbers".to_string(),
                ));
            };
            if to_v != from_v + 1 {
                return Err(ChangeSetError::VersionConflict {
                    expected: from_v + 1,
                    got: to_v,
                });
            }
        }

        let id = ChangeSet::derive_id(
            tenant,
            entity_key,
            from_version,
            to_version,
            from_payload,
            to_payload,
        );

        Ok(ChangeSet {
            id,
            tenant: tenant.to_string(),
            entity_type: entity_type.to_string(),
            entity_key: entity_key.to_string(),
            from_version,
            to_version,
            change_type,
            changed_paths,
            impacts: BTreeMap::new(),
        })
    }

    /// Attach calculated impacts, keeping the record otherwise intact.
    pub fn with_impacts(
        mut change_set: ChangeSet,
        impacts: BTreeMap<String, ivm_models::ImpactDetail>,
    ) -> ChangeSet {
        change_set.impacts = impacts;
        change_set
    }
}

/// Convenience for tests and the contract-simulation API.
pub fn changed_path_set(
    from: Option<&Value>,
    to: Option<&Value>,
) -> BTreeSet<String> {
    match (from, to) {
        (None, None) => BTreeSet::new(),
        (None, Some(v)) | (Some(v), None) => diff::all_paths(v),
        (Some(a), Some(b)) => diff::changed_paths(a, b),
    }
}
