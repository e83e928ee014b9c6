//! Registry bootstrap from the location-cluster index.
//!
//! Every cluster with `property`-role references becomes a property
//! record (or merges into an existing one sharing its dedup key),
//! carrying the cluster's transaction IDs and centroid coordinates.
//! Re-running against the same index is a no-op.

use std::collections::HashMap;

use prop_map_address::dedup_key;
use prop_map_cluster::{LocationIndex, Role};
use prop_map_registry_models::{Property, Source};

use crate::{PropertyRegistry, RegistryError};

/// Summary of a bootstrap pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BootstrapSummary {
    pub clusters_seen: usize,
    pub created: usize,
    pub merged: usize,
    pub skipped_no_property_refs: usize,
    pub skipped_unparseable: usize,
}

/// Splits a cluster's formatted address ("ADDR, CITY, PROVINCE[, POSTAL]")
/// into street and city parts. Returns `None` when there is no city
/// component to key on.
fn split_formatted(formatted: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = formatted.split(',').map(str::trim).collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return None;
    }
    let postal = parts
        .get(3)
        .filter(|p| !p.is_empty())
        .map_or_else(String::new, ToString::to_string);
    Some((parts[0].to_string(), parts[1].to_string(), postal))
}

/// Seeds or refreshes the registry from the location index.
///
/// # Errors
///
/// Returns [`RegistryError`] only from the final save; matching and
/// merging are pure in-memory operations.
pub fn build_from_clusters(
    registry: &mut PropertyRegistry,
    index: &LocationIndex,
    today: &str,
) -> Result<BootstrapSummary, RegistryError> {
    let mut summary = BootstrapSummary {
        clusters_seen: index.locations.len(),
        ..BootstrapSummary::default()
    };

    let mut key_to_pid: HashMap<String, String> = registry.dedup_index();

    for cluster in index.locations.values() {
        let mut rt_ids: Vec<String> = cluster
            .references
            .iter()
            .filter(|r| r.role == Role::Property)
            .map(|r| r.rt_id.clone())
            .collect();
        rt_ids.sort();
        rt_ids.dedup();
        if rt_ids.is_empty() {
            summary.skipped_no_property_refs += 1;
            continue;
        }

        let source = if cluster.formatted_address.is_empty() {
            cluster.address_variants.first().cloned().unwrap_or_default()
        } else {
            cluster.formatted_address.clone()
        };
        let Some((address, city, postal_code)) = split_formatted(&source) else {
            summary.skipped_unparseable += 1;
            continue;
        };

        let key = dedup_key(&address, &city);
        if let Some(pid) = key_to_pid.get(&key) {
            let prop = registry
                .get_mut(pid)
                .expect("dedup index points at live property");
            let mut changed = false;
            for rt_id in rt_ids {
                if !prop.rt_ids.contains(&rt_id) {
                    prop.rt_ids.push(rt_id);
                    changed = true;
                }
            }
            if changed {
                prop.rt_ids.sort();
                prop.transaction_count = prop.rt_ids.len();
                prop.add_source(Source::Rt);
                prop.updated = today.to_string();
                summary.merged += 1;
            }
            continue;
        }

        let transaction_count = rt_ids.len();
        let property = Property {
            address,
            city,
            province: "ON".to_string(),
            postal_code,
            lat: Some(cluster.lat),
            lng: Some(cluster.lng),
            rt_ids,
            transaction_count,
            sources: vec![Source::Rt],
            created: today.to_string(),
            updated: today.to_string(),
            ..Property::default()
        };
        let pid = registry.insert_new(property);
        key_to_pid.insert(key, pid);
        summary.created += 1;
    }

    registry.save()?;
    log::info!(
        "Bootstrap: {} created, {} merged from {} clusters",
        summary.created,
        summary.merged,
        summary.clusters_seen
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prop_map_cluster::{AddressPoint, AddressRef, build_location_index};
    use std::collections::BTreeMap;

    fn index_with(
        points: Vec<AddressPoint>,
        refs: BTreeMap<String, Vec<AddressRef>>,
    ) -> LocationIndex {
        build_location_index(&points, &refs, 50.0, "2026-01-01T00:00:00")
    }

    fn registry(name: &str) -> PropertyRegistry {
        let path = std::env::temp_dir().join(format!(
            "bootstrap-{name}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        PropertyRegistry::open(path).unwrap()
    }

    fn property_point(address: &str, lat: f64, lng: f64) -> AddressPoint {
        AddressPoint {
            address: address.to_string(),
            lat,
            lng,
            formatted: address.to_string(),
        }
    }

    #[test]
    fn creates_properties_from_property_role_clusters() {
        let mut refs = BTreeMap::new();
        refs.insert(
            "70 KING WILLIAM ST, HAMILTON, ONTARIO".to_string(),
            vec![
                AddressRef {
                    rt_id: "RT2".to_string(),
                    role: Role::Property,
                },
                AddressRef {
                    rt_id: "RT1".to_string(),
                    role: Role::Property,
                },
            ],
        );
        let index = index_with(
            vec![property_point(
                "70 KING WILLIAM ST, HAMILTON, ONTARIO",
                43.2570,
                -79.8660,
            )],
            refs,
        );

        let mut reg = registry("creates");
        let summary = build_from_clusters(&mut reg, &index, "2026-01-02").unwrap();
        assert_eq!(summary.created, 1);

        let prop = reg.get("P00001").unwrap();
        assert_eq!(prop.address, "70 KING WILLIAM ST");
        assert_eq!(prop.city, "HAMILTON");
        assert_eq!(prop.rt_ids, vec!["RT1", "RT2"]);
        assert_eq!(prop.transaction_count, 2);
        assert_eq!(prop.lat, Some(43.2570));
    }

    #[test]
    fn seller_only_clusters_are_skipped() {
        let mut refs = BTreeMap::new();
        refs.insert(
            "18 YORK ST, TORONTO, ONTARIO".to_string(),
            vec![AddressRef {
                rt_id: "RT1".to_string(),
                role: Role::Seller,
            }],
        );
        let index = index_with(
            vec![property_point("18 YORK ST, TORONTO, ONTARIO", 43.64, -79.38)],
            refs,
        );

        let mut reg = registry("seller-only");
        let summary = build_from_clusters(&mut reg, &index, "2026-01-02").unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped_no_property_refs, 1);
    }

    #[test]
    fn rerun_is_idempotent() {
        let mut refs = BTreeMap::new();
        refs.insert(
            "70 KING WILLIAM ST, HAMILTON, ONTARIO".to_string(),
            vec![AddressRef {
                rt_id: "RT1".to_string(),
                role: Role::Property,
            }],
        );
        let index = index_with(
            vec![property_point(
                "70 KING WILLIAM ST, HAMILTON, ONTARIO",
                43.2570,
                -79.8660,
            )],
            refs,
        );

        let mut reg = registry("rerun");
        build_from_clusters(&mut reg, &index, "2026-01-02").unwrap();
        let before = reg.properties_snapshot().unwrap();
        let summary = build_from_clusters(&mut reg, &index, "2026-01-03").unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.merged, 0);
        assert_eq!(reg.properties_snapshot().unwrap(), before);
    }
}
