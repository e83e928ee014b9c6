//! Phase 1: address-based brand matching.
//!
//! Properties index by (street number, normalized city); each store
//! looks up its bucket and the candidates are ranked by street-name
//! similarity. A single-candidate bucket that clears the threshold is
//! an `exact` match; multi-candidate buckets record the winning score.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use prop_map_address::{extract_street_number, normalize_city, street_similarity};
use prop_map_registry::PropertyRegistry;
use prop_map_registry_models::{BrandStore, MatchEntry};

use crate::MatchFile;

/// Minimum street-name similarity to accept a candidate.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// A store that could not be matched, with its reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedStore {
    pub brand: String,
    #[serde(default)]
    pub store_name: String,
    pub address: String,
    #[serde(default)]
    pub city: String,
    pub reason: String,
}

/// Outcome of the address phase.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: MatchFile,
    pub unmatched: Vec<UnmatchedStore>,
}

impl MatchOutcome {
    /// Total stores matched across all properties.
    #[must_use]
    pub fn matched_stores(&self) -> usize {
        self.matches.values().map(Vec::len).sum()
    }
}

/// The (street number, normalized city) → candidates index.
pub type PropertyIndex = HashMap<(String, String), Vec<(String, String)>>;

/// Builds the property index from the registry.
#[must_use]
pub fn build_property_index(registry: &PropertyRegistry) -> PropertyIndex {
    let mut index = PropertyIndex::new();
    for (pid, prop) in registry.iter() {
        let Some(number) = extract_street_number(&prop.address) else {
            continue;
        };
        index
            .entry((number, normalize_city(&prop.city)))
            .or_default()
            .push((pid.clone(), prop.address.clone()));
    }
    index
}

/// Scores a store against its candidate bucket. Returns the winning
/// (P-ID, score) when the best candidate clears the threshold.
#[must_use]
pub fn best_candidate(
    store_address: &str,
    candidates: &[(String, String)],
) -> Option<(String, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (pid, prop_address) in candidates {
        let score = street_similarity(store_address, prop_address);
        let better = best.is_none_or(|(_, s)| score > s);
        if better {
            best = Some((pid, score));
        }
    }
    best.and_then(|(pid, score)| {
        (score >= SIMILARITY_THRESHOLD).then(|| (pid.to_string(), score))
    })
}

/// Runs the address phase for every store against the registry.
#[must_use]
pub fn match_brands(registry: &PropertyRegistry, stores: &[BrandStore]) -> MatchOutcome {
    let index = build_property_index(registry);
    let mut outcome = MatchOutcome::default();

    for store in stores {
        let Some(number) = extract_street_number(&store.address) else {
            outcome.unmatched.push(unmatched(store, "no_street_number".to_string()));
            continue;
        };

        let key = (number, normalize_city(&store.city));
        let Some(candidates) = index.get(&key).filter(|c| !c.is_empty()) else {
            outcome.unmatched.push(unmatched(store, "no_match".to_string()));
            continue;
        };

        match best_candidate(&store.address, candidates) {
            Some((pid, score)) => {
                let method = if candidates.len() == 1 {
                    "exact".to_string()
                } else {
                    format!("fuzzy ({score:.2})")
                };
                outcome.matches.entry(pid).or_default().push(MatchEntry {
                    brand: store.brand.clone(),
                    store_name: store.store_name.clone(),
                    address: store.address.clone(),
                    city: store.city.clone(),
                    method,
                });
            }
            None => {
                let best_score = candidates
                    .iter()
                    .map(|(_, addr)| street_similarity(&store.address, addr))
                    .fold(0.0_f64, f64::max);
                outcome.unmatched.push(unmatched(
                    store,
                    format!(
                        "low_similarity ({} candidates, best={best_score:.2})",
                        candidates.len()
                    ),
                ));
            }
        }
    }

    log::info!(
        "Brand match: {} stores -> {} properties, {} unmatched",
        outcome.matched_stores(),
        outcome.matches.len(),
        outcome.unmatched.len()
    );
    outcome
}

fn unmatched(store: &BrandStore, reason: String) -> UnmatchedStore {
    UnmatchedStore {
        brand: store.brand.clone(),
        store_name: store.store_name.clone(),
        address: store.address.clone(),
        city: store.city.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prop_map_registry_models::{Property, Source};

    fn registry_with(props: &[(&str, &str)]) -> PropertyRegistry {
        let path = std::env::temp_dir().join(format!(
            "brand-match-{}-{:?}.json",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);
        let mut reg = PropertyRegistry::open(path).unwrap();
        for (address, city) in props {
            reg.insert_new(Property {
                address: (*address).to_string(),
                city: (*city).to_string(),
                province: "ON".to_string(),
                rt_ids: vec!["RT1".to_string()],
                sources: vec![Source::Rt],
                ..Property::default()
            });
        }
        reg
    }

    fn store(brand: &str, address: &str, city: &str) -> BrandStore {
        BrandStore {
            brand: brand.to_string(),
            store_name: format!("{brand} {city}"),
            address: address.to_string(),
            city: city.to_string(),
            ..BrandStore::default()
        }
    }

    #[test]
    fn single_candidate_is_exact() {
        let reg = registry_with(&[("70 KING WILLIAM ST", "Hamilton")]);
        let outcome = match_brands(&reg, &[store("Harvey's", "70 King William St", "Hamilton")]);
        let entries = &outcome.matches["P00001"];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].method, "exact");
    }

    #[test]
    fn suite_prefix_is_stripped_for_lookup() {
        let reg = registry_with(&[("70 KING WILLIAM ST", "Hamilton")]);
        let outcome = match_brands(&reg, &[store("Harvey's", "B03-70 King William St", "Hamilton")]);
        assert_eq!(outcome.matches["P00001"][0].method, "exact");
        assert!(outcome.unmatched.is_empty());
    }

    #[test]
    fn multiple_candidates_record_fuzzy_score() {
        let reg = registry_with(&[
            ("70 KING WILLIAM ST", "Hamilton"),
            ("70 BARTON ST E", "Hamilton"),
        ]);
        let outcome = match_brands(&reg, &[store("Harvey's", "70 King William Street", "Hamilton")]);
        let entries = &outcome.matches["P00001"];
        assert!(entries[0].method.starts_with("fuzzy (1.00"));
    }

    #[test]
    fn no_street_number_reason() {
        let reg = registry_with(&[("70 KING WILLIAM ST", "Hamilton")]);
        let outcome = match_brands(&reg, &[store("Harvey's", "King William St", "Hamilton")]);
        assert_eq!(outcome.unmatched[0].reason, "no_street_number");
    }

    #[test]
    fn no_bucket_reason() {
        let reg = registry_with(&[("70 KING WILLIAM ST", "Hamilton")]);
        let outcome = match_brands(&reg, &[store("Harvey's", "999 Nowhere Ave", "Hamilton")]);
        assert_eq!(outcome.unmatched[0].reason, "no_match");
    }

    #[test]
    fn low_similarity_reason_carries_best_score() {
        let reg = registry_with(&[("70 BARTON ST E", "Hamilton")]);
        let outcome = match_brands(&reg, &[store("Harvey's", "70 King William St", "Hamilton")]);
        assert!(
            outcome.unmatched[0].reason.starts_with("low_similarity (1 candidates"),
            "reason was {}",
            outcome.unmatched[0].reason
        );
    }

    #[test]
    fn city_alias_bridges_feed_spelling() {
        let reg = registry_with(&[("1500 AVENUE RD", "North York")]);
        let outcome = match_brands(&reg, &[store("Wendy's", "1500 Avenue Rd", "N. York")]);
        assert_eq!(outcome.matched_stores(), 1);
    }
}
