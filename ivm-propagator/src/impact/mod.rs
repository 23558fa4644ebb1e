use std::collections::BTreeMap;

use ivm_models::{ArtifactType, ChangeSet, Contract, ImpactDetail, ImpactRule};

use crate::errors::ImpactError;

/// Maps a ChangeSet's changed paths to affected artifact types through the
/// contract's impact map. Pure function: no I/O, no shared state, safe to
/// call concurrently and repeatedly for the same inputs.
///
/// Matching policy: the most specific matching rule wins per path (literal
/// segment beats `*`, which beats `**`, compared left to right); rules tying
/// at equal specificity all contribute their artifact types.
///
/// Fail-closed: one changed path without a rule fails the whole calculation
/// with every unmapped path listed. An incomplete contract must never
/// silently produce an incomplete set of rebuilt artifacts.
pub fn calculate(
    change_set: &ChangeSet,
    contract: &Contract,
) -> Result<BTreeMap<ArtifactType, ImpactDetail>, ImpactError> {
    if !contract.usable_for_impact() {
        return Err(ImpactError::ContractStatus {
            key: contract.cache_key(),
            status: contract.status,
        });
    }
    if contract.impact_map.is_empty() {
        return Err(ImpactError::EmptyImpactMap(contract.cache_key()));
    }

    let mut impacts: BTreeMap<ArtifactType, ImpactDetail> = BTreeMap::new();
    let mut unmapped: Vec<String> = Vec::new();

    for path in &change_set.changed_paths {
        let winners = best_matches(&contract.impact_map, path);
        if winners.is_empty() {
            unmapped.push(path.clone());
            continue;
        }
        for rule in winners {
            for artifact in &rule.affected {
                let detail = impacts.entry(artifact.clone()).or_default();
                detail.matched_paths.insert(path.clone());
                detail.matched_rules.insert(rule.path_pattern.clone());
            }
        }
    }

    if !unmapped.is_empty() {
        return Err(ImpactError::UnmappedPaths(unmapped));
    }
    Ok(impacts)
}

/// All rules matching `path` at the highest specificity.
fn best_matches<'a>(
    rules: &'a [ImpactRule],
    path: &str,
) -> Vec<&'a ImpactRule> {
    let mut best: Vec<&ImpactRule> = Vec::new();
    let mut best_score: Option<Vec<u8>> = None;

    for rule in rules {
        let Some(score) = match_score(&rule.path_pattern, path) else {
            continue;
        };
        match &best_score {
            Some(current) if *current > score => {}
            Some(current) if *current == score => best.push(rule),
            _ => {
                best_score = Some(score);
                best = vec![rule];
            }
        }
    }
    best
}

/// Specificity vector for a successful match: one entry per pattern segment,
/// literal = 2, `*` = 1, `**` = 0. `None` means no match. Lexicographic
/// comparison of the vectors picks the most specific rule.
fn match_score(pattern: &str, path: &str) -> Option<Vec<u8>> {
    let pattern_segs: Vec<&str> =
        pattern.strip_prefix('/')?.split('/').collect();
    let path_segs: Vec<&str> = path.strip_prefix('/')?.split('/').collect();

    let mut score = Vec::with_capacity(pattern_segs.len());
    let mut i = 0;
    for (pi, pseg) in pattern_segs.iter().enumerate() {
        match *pseg {
            "**" => {
                // Only valid as the final segment; swallows the remainder.
                if pi != pattern_segs.len() - 1 || i >= path_segs.len() {
                    return None;
                }
                score.push(0);
                return Some(score);
            }
            "*" => {
                if i >= path_segs.len() {
                    return None;
                }
                score.push(1);
                i += 1;
            }
            literal => {
                if path_segs.get(i) != Some(&literal) {
                    return None;
                }
                score.push(2);
                i += 1;
            }
        }
    }
    if i == path_segs.len() { Some(score) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert_eq!(match_score("/price", "/price"), Some(vec![2]));
        assert_eq!(match_score("/price", "/name"), None);
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        assert_eq!(match_score("/meta/*", "/meta/color"), Some(vec![2, 1]));
        assert_eq!(match_score("/meta/*", "/meta/color/hue"), None);
        assert_eq!(match_score("/meta/*", "/meta"), None);
    }

    #[test]
    fn double_wildcard_matches_remainder() {
        assert_eq!(match_score("/meta/**", "/meta/color"), Some(vec![2, 0]));
        assert_eq!(
            match_score("/meta/**", "/meta/color/hue"),
            Some(vec![2, 0])
        );
        assert_eq!(match_score("/meta/**", "/meta"), None);
    }

    #[test]
    fn literal_outranks_wildcards() {
        let rules = vec![
            ImpactRule::new("/meta/**", ["SEARCH"]),
            ImpactRule::new("/meta/color", ["CORE"]),
            ImpactRule::new("/meta/*", ["RECOMMENDATION"]),
        ];
        let winners = best_matches(&rules, "/meta/color");
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].path_pattern, "/meta/color");
    }
}
