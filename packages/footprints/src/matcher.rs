//! Property → footprint matching.
//!
//! Containment wins; otherwise the nearest footprint within the
//! fallback distance is taken as a `proximity` match (coordinate
//! drift, not a different building).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use prop_map_registry::PropertyRegistry;
use prop_map_registry_models::FootprintMatchMethod;
use prop_map_spatial::PolygonIndex;

use crate::FootprintsError;

/// Proximity fallback distance in meters.
pub const PROXIMITY_FALLBACK_M: f64 = 100.0;

/// One property's footprint match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintMatch {
    pub footprint_id: String,
    pub method: FootprintMatchMethod,
}

/// Stats for a matching pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchStats {
    pub total_properties: usize,
    pub no_coords: usize,
    pub contained: usize,
    pub proximate: usize,
    pub unmatched: usize,
    pub match_rate_pct: f64,
}

/// The `footprint_matches.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FootprintMatches {
    pub property_footprints: BTreeMap<String, FootprintMatch>,
    pub stats: MatchStats,
}

/// Matches every property with coordinates against the footprint
/// index.
#[must_use]
pub fn match_properties(index: &PolygonIndex, registry: &PropertyRegistry) -> FootprintMatches {
    let mut result = FootprintMatches {
        stats: MatchStats {
            total_properties: registry.len(),
            ..MatchStats::default()
        },
        ..FootprintMatches::default()
    };

    for (pid, prop) in registry.iter() {
        let (Some(lat), Some(lng)) = (prop.lat, prop.lng) else {
            result.stats.no_coords += 1;
            continue;
        };

        if let Some(fp_id) = index.find_containing(lat, lng).into_iter().next() {
            result.property_footprints.insert(
                pid.clone(),
                FootprintMatch {
                    footprint_id: fp_id,
                    method: FootprintMatchMethod::Containment,
                },
            );
            result.stats.contained += 1;
            continue;
        }

        if let Some(fp_id) = index.find_nearest(lat, lng, PROXIMITY_FALLBACK_M) {
            result.property_footprints.insert(
                pid.clone(),
                FootprintMatch {
                    footprint_id: fp_id,
                    method: FootprintMatchMethod::Proximity,
                },
            );
            result.stats.proximate += 1;
        } else {
            result.stats.unmatched += 1;
        }
    }

    let with_coords = result
        .stats
        .total_properties
        .saturating_sub(result.stats.no_coords)
        .max(1);
    #[allow(clippy::cast_precision_loss)]
    {
        result.stats.match_rate_pct = ((result.stats.contained + result.stats.proximate) as f64
            / with_coords as f64
            * 1000.0)
            .round()
            / 10.0;
    }

    log::info!(
        "Footprint match: {} contained, {} proximate, {} unmatched",
        result.stats.contained,
        result.stats.proximate,
        result.stats.unmatched
    );
    result
}

/// Writes a match document atomically.
///
/// # Errors
///
/// Returns [`FootprintsError`] on serialization or write failure.
pub fn save_matches(path: &Path, matches: &FootprintMatches) -> Result<(), FootprintsError> {
    let content = serde_json::to_string_pretty(matches)?;
    prop_map_coords::atomic_write(path, content.as_bytes())?;
    Ok(())
}

/// Reads a match document.
///
/// # Errors
///
/// Returns [`FootprintsError`] when the file is missing or invalid.
pub fn load_matches(path: &Path) -> Result<FootprintMatches, FootprintsError> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prop_map_registry_models::{Property, Source};

    fn square(id: &str, lat: f64, lng: f64, half: f64) -> geojson::Feature {
        let ring = vec![
            vec![lng - half, lat - half],
            vec![lng + half, lat - half],
            vec![lng + half, lat + half],
            vec![lng - half, lat + half],
            vec![lng - half, lat - half],
        ];
        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![ring]))),
            id: None,
            properties: serde_json::from_value(serde_json::json!({
                "fp_id": id,
                "building_type": "retail",
                "centroid_lat": lat,
                "centroid_lng": lng,
            }))
            .unwrap(),
            foreign_members: None,
        }
    }

    fn index(features: Vec<geojson::Feature>) -> PolygonIndex {
        PolygonIndex::from_collection(
            geojson::FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
            crate::FP_ID_PROPERTY,
        )
    }

    fn registry_at(name: &str, coords: &[(f64, f64)]) -> PropertyRegistry {
        let path = std::env::temp_dir().join(format!(
            "fp-match-{name}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let mut reg = PropertyRegistry::open(path).unwrap();
        for (i, (lat, lng)) in coords.iter().enumerate() {
            reg.insert_new(Property {
                address: format!("{i} MAIN ST"),
                city: "Toronto".to_string(),
                province: "ON".to_string(),
                lat: Some(*lat),
                lng: Some(*lng),
                rt_ids: vec![format!("RT{i}")],
                sources: vec![Source::Rt],
                ..Property::default()
            });
        }
        reg
    }

    #[test]
    fn containment_beats_proximity() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.001)]);
        let reg = registry_at("contain", &[(43.65, -79.38)]);
        let result = match_properties(&idx, &reg);
        let m = &result.property_footprints["P00001"];
        assert_eq!(m.footprint_id, "fp_1");
        assert_eq!(m.method, FootprintMatchMethod::Containment);
        assert_eq!(result.stats.contained, 1);
    }

    #[test]
    fn nearby_point_falls_back_to_proximity() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.0001)]);
        // ~45m south of the polygon edge.
        let reg = registry_at("prox", &[(43.6494, -79.38)]);
        let result = match_properties(&idx, &reg);
        let m = &result.property_footprints["P00001"];
        assert_eq!(m.method, FootprintMatchMethod::Proximity);
        assert_eq!(result.stats.proximate, 1);
    }

    #[test]
    fn distant_and_coordless_properties_are_counted() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.0001)]);
        let mut reg = registry_at("far", &[(44.65, -80.38)]);
        reg.insert_new(Property {
            address: "NO COORDS ST".to_string(),
            city: "Toronto".to_string(),
            ..Property::default()
        });
        let result = match_properties(&idx, &reg);
        assert_eq!(result.stats.unmatched, 1);
        assert_eq!(result.stats.no_coords, 1);
        assert!(result.property_footprints.is_empty());
    }

    #[test]
    fn match_file_round_trips() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.001)]);
        let reg = registry_at("roundtrip", &[(43.65, -79.38)]);
        let result = match_properties(&idx, &reg);

        let path = std::env::temp_dir().join(format!(
            "fp-match-file-{}.json",
            std::process::id()
        ));
        save_matches(&path, &result).unwrap();
        let loaded = load_matches(&path).unwrap();
        assert_eq!(loaded.property_footprints, result.property_footprints);
        let _ = std::fs::remove_file(&path);
    }
}
