//! Phase 2: proximity-based brand matching.
//!
//! Stores that the address phase could not place are matched to the
//! nearest property within a distance threshold. A coarse 0.01° grid
//! (~1.1 km at Ontario latitudes) keeps the candidate set small; real
//! distances are haversine. Both sides resolve coordinates through the
//! coordinate store first, falling back to whatever the record itself
//! carries.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use prop_map_coords::{CoordinateStore, haversine_m};
use prop_map_registry::PropertyRegistry;
use prop_map_registry_models::BrandStore;

use crate::{BrandsError, MatchFile};

/// Default match threshold in meters. Tuned independently of the
/// snapper's brand-POI gate; keep the two knobs separate.
pub const DEFAULT_THRESHOLD_M: f64 = 150.0;

/// Grid cell size in degrees (~1.1 km at 43N).
const GRID_CELL_SIZE: f64 = 0.01;

/// One proximity match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityMatch {
    pub brand: String,
    #[serde(default)]
    pub store_name: String,
    pub store_address: String,
    #[serde(default)]
    pub store_city: String,
    pub store_lat: f64,
    pub store_lng: f64,
    pub prop_id: String,
    pub prop_address: String,
    #[serde(default)]
    pub prop_city: String,
    /// Haversine distance, meters (1 decimal).
    pub distance_m: f64,
    /// How many other properties were inside the threshold.
    pub alternatives: usize,
}

/// Stats block of the proximity report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProximityStats {
    pub total_stores: usize,
    pub already_matched: usize,
    pub no_coordinates: usize,
    pub no_nearby_property: usize,
    pub proximity_matches: usize,
}

/// The `brand_proximity.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityReport {
    pub threshold_m: f64,
    pub generated_at: String,
    pub stats: ProximityStats,
    pub matches: Vec<ProximityMatch>,
}

type Grid = HashMap<(i64, i64), Vec<(String, f64, f64)>>;

#[allow(clippy::cast_possible_truncation)]
fn grid_key(lat: f64, lng: f64) -> (i64, i64) {
    ((lat / GRID_CELL_SIZE) as i64, (lng / GRID_CELL_SIZE) as i64)
}

/// Best coordinates for a property: coordinate store first (keyed by
/// "address, city, province[, postal]"), then the registry record.
fn property_coords(
    prop: &prop_map_registry_models::Property,
    coords: &CoordinateStore,
) -> Option<(f64, f64)> {
    if !prop.address.is_empty() && !prop.city.is_empty() {
        let province = if prop.province.is_empty() {
            "ONTARIO"
        } else {
            prop.province.as_str()
        };
        let mut parts = vec![prop.address.clone(), prop.city.clone(), province.to_string()];
        if !prop.postal_code.is_empty() {
            parts.push(prop.postal_code.clone());
        }
        if let Some(found) = coords.best_coords(&parts.join(", ")) {
            return Some(found);
        }
    }
    prop.lat.zip(prop.lng)
}

/// Builds the property grid from registry + coordinate store.
#[must_use]
pub fn build_property_grid(registry: &PropertyRegistry, coords: &CoordinateStore) -> Grid {
    let mut grid = Grid::new();
    for (pid, prop) in registry.iter() {
        if let Some((lat, lng)) = property_coords(prop, coords) {
            grid.entry(grid_key(lat, lng))
                .or_default()
                .push((pid.clone(), lat, lng));
        }
    }
    grid
}

/// Properties within `threshold_m` of the point, sorted by distance.
#[must_use]
pub fn find_nearby(lat: f64, lng: f64, grid: &Grid, threshold_m: f64) -> Vec<(String, f64)> {
    let center = grid_key(lat, lng);
    let mut results: Vec<(String, f64)> = Vec::new();
    for dr in -1..=1 {
        for dc in -1..=1 {
            let Some(cell) = grid.get(&(center.0 + dr, center.1 + dc)) else {
                continue;
            };
            for (pid, plat, plng) in cell {
                let dist = haversine_m(lat, lng, *plat, *plng);
                if dist <= threshold_m {
                    results.push((pid.clone(), dist));
                }
            }
        }
    }
    results.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .expect("finite distances")
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

/// Runs the proximity phase over every store not already matched by
/// address, and writes `brand_proximity.json`.
///
/// # Errors
///
/// Returns [`BrandsError`] on report serialization or write failure.
pub fn run_proximity(
    registry: &PropertyRegistry,
    coords: &CoordinateStore,
    stores: &[BrandStore],
    existing_matches: &MatchFile,
    threshold_m: f64,
    report_path: &Path,
) -> Result<ProximityReport, BrandsError> {
    let grid = build_property_grid(registry, coords);
    let grid_props: usize = grid.values().map(Vec::len).sum();
    log::info!(
        "Property grid: {grid_props} geocoded properties in {} cells",
        grid.len()
    );

    let skip: HashSet<(String, String)> = crate::already_matched(existing_matches);

    let mut stats = ProximityStats {
        total_stores: stores.len(),
        ..ProximityStats::default()
    };
    let mut matches = Vec::new();

    for store in stores {
        if skip.contains(&(store.brand.to_uppercase(), store.address.to_uppercase())) {
            stats.already_matched += 1;
            continue;
        }

        let store_coords = if store.address.is_empty() || store.city.is_empty() {
            store.lat.zip(store.lng)
        } else {
            coords
                .best_coords(&store.geocodable_address())
                .or_else(|| store.lat.zip(store.lng))
        };
        let Some((lat, lng)) = store_coords else {
            stats.no_coordinates += 1;
            continue;
        };

        let nearby = find_nearby(lat, lng, &grid, threshold_m);
        let Some((pid, dist)) = nearby.first() else {
            stats.no_nearby_property += 1;
            continue;
        };

        let prop = registry.get(pid).expect("grid points at live property");
        matches.push(ProximityMatch {
            brand: store.brand.clone(),
            store_name: store.store_name.clone(),
            store_address: store.address.clone(),
            store_city: store.city.clone(),
            store_lat: lat,
            store_lng: lng,
            prop_id: pid.clone(),
            prop_address: prop.address.clone(),
            prop_city: prop.city.clone(),
            distance_m: (dist * 10.0).round() / 10.0,
            alternatives: nearby.len() - 1,
        });
    }

    stats.proximity_matches = matches.len();
    let report = ProximityReport {
        threshold_m,
        generated_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        stats,
        matches,
    };

    let content = serde_json::to_string_pretty(&report)?;
    prop_map_coords::atomic_write(report_path, content.as_bytes())?;
    log::info!(
        "Proximity: {} matches of {} stores (threshold {threshold_m}m)",
        report.stats.proximity_matches,
        report.stats.total_stores
    );
    Ok(report)
}

/// Merges confirmed proximity matches into the match file,
/// deduplicating by (brand, address). Returns the count added.
///
/// # Errors
///
/// Returns [`BrandsError`] on read or write failure.
pub fn merge_proximity_matches(
    matches_path: &Path,
    report: &ProximityReport,
) -> Result<usize, BrandsError> {
    let mut matches = crate::load_match_file(matches_path)?;
    let mut seen = crate::already_matched(&matches);

    let mut added = 0;
    for m in &report.matches {
        let key = (m.brand.to_uppercase(), m.store_address.to_uppercase());
        if seen.contains(&key) {
            continue;
        }
        matches
            .entry(m.prop_id.clone())
            .or_default()
            .push(prop_map_registry_models::MatchEntry {
                brand: m.brand.clone(),
                store_name: m.store_name.clone(),
                address: m.store_address.clone(),
                city: m.store_city.clone(),
                method: format!("proximity ({:.0}m)", m.distance_m),
            });
        seen.insert(key);
        added += 1;
    }

    crate::save_match_file(matches_path, &matches)?;
    log::info!("Merged {added} proximity matches into {}", matches_path.display());
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prop_map_registry_models::{Property, Source};

    fn temp(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "brand-prox-{name}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn registry_at(name: &str, props: &[(&str, &str, f64, f64)]) -> PropertyRegistry {
        let mut reg = PropertyRegistry::open(temp(name)).unwrap();
        for (address, city, lat, lng) in props {
            reg.insert_new(Property {
                address: (*address).to_string(),
                city: (*city).to_string(),
                province: "ON".to_string(),
                lat: Some(*lat),
                lng: Some(*lng),
                rt_ids: vec!["RT1".to_string()],
                sources: vec![Source::Rt],
                ..Property::default()
            });
        }
        reg
    }

    fn store_at(brand: &str, lat: f64, lng: f64) -> BrandStore {
        BrandStore {
            brand: brand.to_string(),
            address: format!("{brand} PLAZA"),
            city: "Toronto".to_string(),
            lat: Some(lat),
            lng: Some(lng),
            ..BrandStore::default()
        }
    }

    fn empty_coords(name: &str) -> CoordinateStore {
        CoordinateStore::open(temp(&format!("coords-{name}"))).unwrap()
    }

    #[test]
    fn matches_nearest_within_threshold() {
        let reg = registry_at(
            "near",
            &[("1 CLOSE ST", "Toronto", 43.6501, -79.3801), ("2 FAR ST", "Toronto", 43.6700, -79.3800)],
        );
        let coords = empty_coords("near");
        let report = run_proximity(
            &reg,
            &coords,
            &[store_at("Harvey's", 43.6500, -79.3800)],
            &MatchFile::new(),
            DEFAULT_THRESHOLD_M,
            &temp("near-report"),
        )
        .unwrap();

        assert_eq!(report.stats.proximity_matches, 1);
        let m = &report.matches[0];
        assert_eq!(m.prop_id, "P00001");
        // ~14m: 0.0001 deg lat + 0.0001 deg lng at 43.65N.
        assert!((m.distance_m - 14.2).abs() < 1.0, "distance was {}", m.distance_m);
        assert_eq!(m.alternatives, 0);
    }

    #[test]
    fn beyond_threshold_is_no_nearby() {
        let reg = registry_at("far", &[("2 FAR ST", "Toronto", 43.6700, -79.3800)]);
        let coords = empty_coords("far");
        let report = run_proximity(
            &reg,
            &coords,
            &[store_at("Harvey's", 43.6500, -79.3800)],
            &MatchFile::new(),
            DEFAULT_THRESHOLD_M,
            &temp("far-report"),
        )
        .unwrap();
        assert_eq!(report.stats.no_nearby_property, 1);
        assert!(report.matches.is_empty());
    }

    #[test]
    fn already_matched_stores_are_skipped() {
        let reg = registry_at("skip", &[("1 CLOSE ST", "Toronto", 43.6501, -79.3801)]);
        let coords = empty_coords("skip");
        let mut existing = MatchFile::new();
        existing.entry("P00001".to_string()).or_default().push(
            prop_map_registry_models::MatchEntry {
                brand: "Harvey's".to_string(),
                store_name: String::new(),
                address: "Harvey's PLAZA".to_string(),
                city: "Toronto".to_string(),
                method: "exact".to_string(),
            },
        );
        let report = run_proximity(
            &reg,
            &coords,
            &[store_at("Harvey's", 43.6500, -79.3800)],
            &existing,
            DEFAULT_THRESHOLD_M,
            &temp("skip-report"),
        )
        .unwrap();
        assert_eq!(report.stats.already_matched, 1);
        assert!(report.matches.is_empty());
    }

    #[test]
    fn store_without_coordinates_is_counted() {
        let reg = registry_at("nocoords", &[("1 CLOSE ST", "Toronto", 43.6501, -79.3801)]);
        let coords = empty_coords("nocoords");
        let mut store = store_at("Harvey's", 0.0, 0.0);
        store.lat = None;
        store.lng = None;
        let report = run_proximity(
            &reg,
            &coords,
            &[store],
            &MatchFile::new(),
            DEFAULT_THRESHOLD_M,
            &temp("nocoords-report"),
        )
        .unwrap();
        assert_eq!(report.stats.no_coordinates, 1);
    }

    #[test]
    fn merge_adds_once() {
        let matches_path = temp("merge-matches");
        let report = ProximityReport {
            threshold_m: 150.0,
            generated_at: "t".to_string(),
            stats: ProximityStats::default(),
            matches: vec![ProximityMatch {
                brand: "Harvey's".to_string(),
                store_name: String::new(),
                store_address: "70 King William St".to_string(),
                store_city: "Hamilton".to_string(),
                store_lat: 43.0,
                store_lng: -79.0,
                prop_id: "P00001".to_string(),
                prop_address: "70 KING WILLIAM ST".to_string(),
                prop_city: "Hamilton".to_string(),
                distance_m: 14.2,
                alternatives: 0,
            }],
        };
        assert_eq!(merge_proximity_matches(&matches_path, &report).unwrap(), 1);
        assert_eq!(merge_proximity_matches(&matches_path, &report).unwrap(), 0);

        let matches = crate::load_match_file(&matches_path).unwrap();
        assert_eq!(matches["P00001"][0].method, "proximity (14m)");
    }
}
