//! Import of brand stores into the property registry.
//!
//! Five steps, in fixed order:
//!
//! 1. Enrich already-matched properties: add the `brand` source and
//!    backfill postal code / coordinates from the scraped record.
//! 2. Fuzzy-match previously-unmatched stores against the full
//!    registry with the same index and threshold as the address phase.
//! 3. Create new brand-only properties for the residual.
//! 4. Orphan cleanup: when a dedup key holds both a real property
//!    (has transactions) and a brand-only one, fold the orphan into
//!    the real property and delete it.
//! 5. Merge the new match entries into `brand_matches.json`.
//!
//! All mutation happens in memory; the registry and match file are
//! written once at the end, so a failed cleanup aborts the whole pass
//! with the prior on-disk state intact.

use std::path::Path;

use prop_map_address::{extract_street_number, normalize_city};
use prop_map_registry::PropertyRegistry;
use prop_map_registry_models::{BrandStore, MatchEntry, Property, Source};

use crate::matcher::{UnmatchedStore, best_candidate};
use crate::{BrandsError, MatchFile, StoreLookup};

/// Summary of an import pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportSummary {
    pub enriched: usize,
    pub fuzzy_matched: usize,
    pub created: usize,
    pub orphans_removed: usize,
    pub total_properties: usize,
}

fn backfill_from_store(prop: &mut Property, store: &BrandStore) {
    if prop.postal_code.is_empty() && !store.postal_code.is_empty() {
        prop.postal_code.clone_from(&store.postal_code);
    }
    if prop.lat.is_none() && store.lat.is_some() {
        prop.lat = store.lat;
    }
    if prop.lng.is_none() && store.lng.is_some() {
        prop.lng = store.lng;
    }
}

/// Runs the import.
///
/// `matches` and `unmatched` are the outputs of the address phase
/// (already merged with any confirmed proximity matches). The match
/// file at `matches_path` is rewritten to reflect all linkages.
///
/// # Errors
///
/// Returns [`BrandsError`] on persistence failure or when orphan
/// cleanup would leave dangling match entries; in both cases nothing
/// has been written.
pub fn import_to_registry(
    registry: &mut PropertyRegistry,
    stores: &[BrandStore],
    matches: &MatchFile,
    unmatched: &[UnmatchedStore],
    matches_path: &Path,
    today: &str,
) -> Result<ImportSummary, BrandsError> {
    let lookup = StoreLookup::new(stores);
    let mut summary = ImportSummary::default();
    let mut all_matches = matches.clone();

    // --- Step 1: enrich already-matched properties ---
    for (pid, entries) in matches {
        let Some(prop) = registry.get_mut(pid) else {
            continue;
        };
        prop.add_source(Source::Brand);
        for entry in entries {
            if let Some(store) = lookup.find(&entry.brand, &entry.address, &entry.city) {
                backfill_from_store(prop, store);
            }
        }
        prop.updated = today.to_string();
        summary.enriched += 1;
    }
    log::info!("Step 1: enriched {} already-matched properties", summary.enriched);

    // --- Steps 2 + 3: process unmatched stores ---
    let mut index = crate::matcher::build_property_index(registry);

    for u in unmatched {
        if u.address.is_empty() {
            continue;
        }
        let number = extract_street_number(&u.address);
        let norm_city = if u.city.is_empty() {
            String::new()
        } else {
            normalize_city(&u.city)
        };

        let matched_pid = match (&number, norm_city.is_empty()) {
            (Some(number), false) => index
                .get(&(number.clone(), norm_city.clone()))
                .and_then(|candidates| best_candidate(&u.address, candidates))
                .map(|(pid, _)| pid),
            _ => None,
        };

        if let Some(pid) = matched_pid {
            let prop = registry.get_mut(&pid).expect("index points at live property");
            prop.add_source(Source::Brand);
            if let Some(store) = lookup.find(&u.brand, &u.address, &u.city) {
                backfill_from_store(prop, store);
            }
            prop.updated = today.to_string();
            all_matches.entry(pid).or_default().push(MatchEntry {
                brand: u.brand.clone(),
                store_name: u.store_name.clone(),
                address: u.address.clone(),
                city: u.city.clone(),
                method: "fuzzy_import".to_string(),
            });
            summary.fuzzy_matched += 1;
        } else {
            let store = lookup.find(&u.brand, &u.address, &u.city);
            let property = Property {
                address: u.address.clone(),
                city: u.city.clone(),
                province: store.map_or_else(|| "ON".to_string(), |s| s.province.clone()),
                postal_code: store.map_or_else(String::new, |s| s.postal_code.clone()),
                lat: store.and_then(|s| s.lat),
                lng: store.and_then(|s| s.lng),
                sources: vec![Source::Brand],
                created: today.to_string(),
                updated: today.to_string(),
                ..Property::default()
            };
            let pid = registry.insert_new(property);
            all_matches.entry(pid.clone()).or_default().push(MatchEntry {
                brand: u.brand.clone(),
                store_name: u.store_name.clone(),
                address: u.address.clone(),
                city: u.city.clone(),
                method: "new_property".to_string(),
            });
            // Later stores in this pass can match the new property.
            if let (Some(number), false) = (number, norm_city.is_empty()) {
                index
                    .entry((number, norm_city))
                    .or_default()
                    .push((pid, u.address.clone()));
            }
            summary.created += 1;
        }
    }
    log::info!(
        "Step 2: fuzzy-matched {} previously-unmatched stores",
        summary.fuzzy_matched
    );
    log::info!("Step 3: created {} new brand-only properties", summary.created);

    // --- Step 4: orphan cleanup ---
    for (_, pids) in registry.dedup_groups() {
        if pids.len() < 2 {
            continue;
        }
        let real_pids: Vec<&String> = pids
            .iter()
            .filter(|pid| registry.get(pid).is_some_and(|p| !p.rt_ids.is_empty()))
            .collect();
        let orphan_pids: Vec<String> = pids
            .iter()
            .filter(|pid| registry.get(pid).is_some_and(Property::is_brand_only))
            .cloned()
            .collect();
        let Some(&target_pid) = real_pids.first() else {
            continue;
        };
        let target_pid = target_pid.clone();

        for orphan_pid in orphan_pids {
            let orphan = registry
                .remove(&orphan_pid)
                .ok_or_else(|| BrandsError::DanglingMatches(orphan_pid.clone()))?;
            let target = registry
                .get_mut(&target_pid)
                .ok_or_else(|| BrandsError::DanglingMatches(target_pid.clone()))?;

            target.add_source(Source::Brand);
            if target.postal_code.is_empty() && !orphan.postal_code.is_empty() {
                target.postal_code = orphan.postal_code;
            }
            if target.lat.is_none() && orphan.lat.is_some() {
                target.lat = orphan.lat;
            }
            if target.lng.is_none() && orphan.lng.is_some() {
                target.lng = orphan.lng;
            }

            // Reassign the orphan's match entries to the target.
            if let Some(entries) = all_matches.remove(&orphan_pid) {
                all_matches.entry(target_pid.clone()).or_default().extend(entries);
            }
            summary.orphans_removed += 1;
        }
    }
    log::info!("Step 4: removed {} orphan duplicates", summary.orphans_removed);

    // --- Save registry, then Step 5: merge matches ---
    registry.save()?;
    summary.total_properties = registry.len();

    crate::save_match_file(matches_path, &all_matches)?;
    let total_matched: usize = all_matches.values().map(Vec::len).sum();
    log::info!(
        "brand_matches.json updated: {total_matched} stores -> {} properties",
        all_matches.len()
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::match_brands;

    fn temp(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "brand-import-{name}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn registry(name: &str) -> PropertyRegistry {
        PropertyRegistry::open(temp(name)).unwrap()
    }

    fn rt_property(address: &str, city: &str) -> Property {
        Property {
            address: address.to_string(),
            city: city.to_string(),
            province: "ON".to_string(),
            rt_ids: vec!["RT1".to_string()],
            transaction_count: 1,
            sources: vec![Source::Rt],
            ..Property::default()
        }
    }

    fn store(brand: &str, address: &str, city: &str) -> BrandStore {
        BrandStore {
            brand: brand.to_string(),
            store_name: format!("{brand} {city}"),
            address: address.to_string(),
            city: city.to_string(),
            postal_code: "L8R 1A1".to_string(),
            lat: Some(43.2570),
            lng: Some(-79.8660),
            ..BrandStore::default()
        }
    }

    #[test]
    fn full_match_and_import_cycle() {
        let mut reg = registry("cycle");
        reg.insert_new(rt_property("70 KING WILLIAM ST", "Hamilton"));

        let stores = vec![store("Harvey's", "B03-70 King William St", "Hamilton")];
        let outcome = match_brands(&reg, &stores);
        assert_eq!(outcome.matches["P00001"][0].method, "exact");

        let matches_path = temp("cycle-matches");
        let summary = import_to_registry(
            &mut reg,
            &stores,
            &outcome.matches,
            &outcome.unmatched,
            &matches_path,
            "2026-01-02",
        )
        .unwrap();

        assert_eq!(summary.enriched, 1);
        let prop = reg.get("P00001").unwrap();
        assert!(prop.has_source(Source::Brand));
        assert_eq!(prop.postal_code, "L8R 1A1");
        assert_eq!(prop.lat, Some(43.2570));

        let saved = crate::load_match_file(&matches_path).unwrap();
        assert_eq!(saved["P00001"].len(), 1);
    }

    #[test]
    fn unmatched_store_creates_brand_only_property() {
        let mut reg = registry("create");
        reg.insert_new(rt_property("1 ELSEWHERE AVE", "Toronto"));

        let stores = vec![store("Harvey's", "999 Nowhere Ave", "Guelph")];
        let outcome = match_brands(&reg, &stores);
        assert_eq!(outcome.unmatched.len(), 1);

        let summary = import_to_registry(
            &mut reg,
            &stores,
            &outcome.matches,
            &outcome.unmatched,
            &temp("create-matches"),
            "2026-01-02",
        )
        .unwrap();

        assert_eq!(summary.created, 1);
        let prop = reg.get("P00002").unwrap();
        assert!(prop.is_brand_only());
        assert_eq!(prop.lat, Some(43.2570));
    }

    #[test]
    fn orphan_cleanup_folds_brand_only_duplicate_into_real() {
        let mut reg = registry("orphan");
        // P00001: real property with transactions, no postal code.
        reg.insert_new(Property {
            address: "618 BLOOR ST W".to_string(),
            city: "Toronto".to_string(),
            province: "ON".to_string(),
            rt_ids: vec!["RT1".to_string()],
            transaction_count: 1,
            sources: vec![Source::Rt],
            ..Property::default()
        });
        // P00002: brand-only orphan sharing the dedup key.
        reg.insert_new(Property {
            address: "618 Bloor Street West".to_string(),
            city: "Toronto".to_string(),
            province: "ON".to_string(),
            postal_code: "M6G 1K7".to_string(),
            lat: Some(43.6645),
            lng: Some(-79.4140),
            sources: vec![Source::Brand],
            ..Property::default()
        });

        let mut matches = MatchFile::new();
        matches.entry("P00002".to_string()).or_default().push(MatchEntry {
            brand: "Harvey's".to_string(),
            store_name: String::new(),
            address: "618 Bloor Street West".to_string(),
            city: "Toronto".to_string(),
            method: "exact".to_string(),
        });

        let matches_path = temp("orphan-matches");
        let summary =
            import_to_registry(&mut reg, &[], &matches, &[], &matches_path, "2026-01-02").unwrap();

        assert_eq!(summary.orphans_removed, 1);
        assert!(reg.get("P00002").is_none());
        let real = reg.get("P00001").unwrap();
        assert!(real.has_source(Source::Brand));
        assert_eq!(real.postal_code, "M6G 1K7");
        assert_eq!(real.lat, Some(43.6645));

        // Match entries moved from the orphan to the real property.
        let saved = crate::load_match_file(&matches_path).unwrap();
        assert!(saved.get("P00002").is_none());
        assert_eq!(saved["P00001"].len(), 1);
    }

    #[test]
    fn double_import_is_idempotent() {
        let mut reg = registry("idem");
        reg.insert_new(rt_property("70 KING WILLIAM ST", "Hamilton"));
        let stores = vec![store("Harvey's", "70 King William St", "Hamilton")];
        let outcome = match_brands(&reg, &stores);
        let matches_path = temp("idem-matches");

        import_to_registry(
            &mut reg,
            &stores,
            &outcome.matches,
            &outcome.unmatched,
            &matches_path,
            "2026-01-02",
        )
        .unwrap();
        let first = reg.properties_snapshot().unwrap();

        import_to_registry(
            &mut reg,
            &stores,
            &outcome.matches,
            &outcome.unmatched,
            &matches_path,
            "2026-01-02",
        )
        .unwrap();
        assert_eq!(reg.properties_snapshot().unwrap(), first);
    }

    #[test]
    fn fuzzy_import_links_against_full_registry() {
        let mut reg = registry("fuzzy");
        reg.insert_new(rt_property("160 MAIN ST W", "Hamilton"));

        // The address phase ran against an older registry and missed.
        let unmatched = vec![UnmatchedStore {
            brand: "Wendy's".to_string(),
            store_name: String::new(),
            address: "160 Main Street West".to_string(),
            city: "Hamilton".to_string(),
            reason: "no_match".to_string(),
        }];

        let summary = import_to_registry(
            &mut reg,
            &[],
            &MatchFile::new(),
            &unmatched,
            &temp("fuzzy-matches"),
            "2026-01-02",
        )
        .unwrap();

        assert_eq!(summary.fuzzy_matched, 1);
        assert!(reg.get("P00001").unwrap().has_source(Source::Brand));
    }
}
