//! Registry enrichment with footprint fields and coordinate snapping.
//!
//! Snapping priority per property:
//!
//! 1. Brand POI coordinates from scraper data, when they lie within
//!    the sanity gate of the current coordinates (a same-brand store
//!    in the wrong city would otherwise teleport the pin). On snap,
//!    containment is re-run at the POI and a hit overwrites the
//!    footprint match as `brand_containment`.
//! 2. The matched building's centroid, only for `containment` matches
//!    (a proximity match means the pin was outside the building, and
//!    its centroid may belong to the neighbor).
//! 3. No snap.
//!
//! Every pass first clears stale footprint fields and restores
//! pre-snap coordinates, so re-running is idempotent.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use prop_map_brands::MatchFile;
use prop_map_coords::haversine_m;
use prop_map_registry::PropertyRegistry;
use prop_map_registry_models::{BrandStore, FootprintMatchMethod, SnapSource};
use prop_map_spatial::PolygonIndex;

use crate::FootprintsError;
use crate::matcher::FootprintMatches;

/// Default sanity gate for brand-POI snaps, meters. Independent of the
/// proximity matcher's threshold.
pub const DEFAULT_BRAND_POI_GATE_M: f64 = 500.0;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Short-form street suffixes for joining match entries to scraper
/// records. This is a join key between two spellings of the same feed,
/// not the dedup normalizer.
static SHORT_SUFFIXES: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("road", "rd"),
    ("drive", "dr"),
    ("boulevard", "blvd"),
];

fn norm_addr(s: &str) -> String {
    let s = s.to_lowercase().replace(['.', ','], "");
    let s = WHITESPACE.replace_all(s.trim(), " ").into_owned();
    s.split(' ')
        .map(|token| {
            SHORT_SUFFIXES
                .iter()
                .find(|(long, _)| token == *long)
                .map_or(token, |(_, short)| *short)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn norm_city(s: &str) -> String {
    let s = s.to_lowercase().replace(['.', ','], "");
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Builds P-ID → brand POI coordinates by joining match entries to
/// scraper records on (brand, address, city). The first matching
/// entry's coordinates win.
#[must_use]
pub fn build_brand_poi_coords(
    matches: &MatchFile,
    stores: &[BrandStore],
) -> BTreeMap<String, (f64, f64)> {
    let mut scraper_lookup: BTreeMap<(String, String, String), (f64, f64)> = BTreeMap::new();
    for store in stores {
        if let (Some(lat), Some(lng)) = (store.lat, store.lng) {
            scraper_lookup
                .entry((
                    store.brand.to_lowercase().trim().to_string(),
                    norm_addr(&store.address),
                    norm_city(&store.city),
                ))
                .or_insert((lat, lng));
        }
    }

    let mut result = BTreeMap::new();
    for (pid, entries) in matches {
        for entry in entries {
            let key = (
                entry.brand.to_lowercase().trim().to_string(),
                norm_addr(&entry.address),
                norm_city(&entry.city),
            );
            if let Some(&coords) = scraper_lookup.get(&key) {
                result.insert(pid.clone(), coords);
                break;
            }
        }
    }
    result
}

/// Summary of an enrichment pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EnrichSummary {
    pub enriched: usize,
    pub cleared_stale: usize,
    pub coords_snapped: usize,
    pub snapped_brand_poi: usize,
    pub snapped_footprint_centroid: usize,
    pub avg_snap_distance_m: f64,
    pub max_snap_distance_m: f64,
    pub total_properties: usize,
    pub brand_poi_available: usize,
}

fn round7(value: f64) -> f64 {
    (value * 1e7).round() / 1e7
}

fn apply_footprint(
    prop: &mut prop_map_registry_models::Property,
    index: &PolygonIndex,
    fp_id: &str,
    method: FootprintMatchMethod,
) {
    prop.footprint_id = Some(fp_id.to_string());
    prop.footprint_match_method = Some(method);
    prop.footprint_area_sqm = index.get_area_sqm(fp_id);
    prop.footprint_building_type = index
        .get_feature(fp_id)
        .and_then(|props| props.get("building_type"))
        .and_then(serde_json::Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from);
}

fn feature_centroid(index: &PolygonIndex, fp_id: &str) -> Option<(f64, f64)> {
    let props = index.get_feature(fp_id)?;
    let lat = props.get("centroid_lat").and_then(serde_json::Value::as_f64)?;
    let lng = props.get("centroid_lng").and_then(serde_json::Value::as_f64)?;
    Some((lat, lng))
}

/// Applies footprint matches to the registry and snaps coordinates.
///
/// # Errors
///
/// Returns [`FootprintsError`] if the registry save fails (unless
/// `dry_run`); the prior file stays intact in that case.
#[allow(clippy::too_many_lines)]
pub fn enrich_properties(
    registry: &mut PropertyRegistry,
    index: &PolygonIndex,
    matches: &FootprintMatches,
    brand_poi: &BTreeMap<String, (f64, f64)>,
    snap_coords: bool,
    brand_poi_gate_m: f64,
    dry_run: bool,
) -> Result<EnrichSummary, FootprintsError> {
    let mut summary = EnrichSummary {
        total_properties: registry.len(),
        brand_poi_available: brand_poi.len(),
        ..EnrichSummary::default()
    };
    let mut snap_distances: Vec<f64> = Vec::new();

    // Clear stale fields and restore pre-snap coordinates first, so
    // a re-run starts from the same state as a first run.
    for (_, prop) in registry.iter_mut() {
        if prop.footprint_id.is_some() || prop.pre_snap_lat.is_some() {
            summary.cleared_stale += 1;
        }
        prop.clear_footprint_fields();
    }

    for (pid, m) in &matches.property_footprints {
        let Some(prop) = registry.get_mut(pid) else {
            continue;
        };
        apply_footprint(prop, index, &m.footprint_id, m.method);
        summary.enriched += 1;

        if !snap_coords {
            continue;
        }
        let (Some(old_lat), Some(old_lng)) = (prop.lat, prop.lng) else {
            continue;
        };

        let mut snap: Option<(f64, f64, SnapSource)> = None;

        if let Some(&(poi_lat, poi_lng)) = brand_poi.get(pid) {
            let poi_dist = haversine_m(old_lat, old_lng, poi_lat, poi_lng);
            if poi_dist <= brand_poi_gate_m {
                snap = Some((poi_lat, poi_lng, SnapSource::BrandPoi));
                // The POI is the truer point; re-check which building
                // it lands in.
                if let Some(fp_id) = index.find_containing(poi_lat, poi_lng).into_iter().next() {
                    apply_footprint(prop, index, &fp_id, FootprintMatchMethod::BrandContainment);
                }
            }
        } else if m.method == FootprintMatchMethod::Containment {
            snap = feature_centroid(index, &m.footprint_id)
                .map(|(lat, lng)| (lat, lng, SnapSource::FootprintCentroid));
        }

        if let Some((snap_lat, snap_lng, source)) = snap {
            snap_distances.push(haversine_m(old_lat, old_lng, snap_lat, snap_lng));
            prop.pre_snap_lat = Some(old_lat);
            prop.pre_snap_lng = Some(old_lng);
            prop.lat = Some(round7(snap_lat));
            prop.lng = Some(round7(snap_lng));
            prop.footprint_snap_source = Some(source);
            match source {
                SnapSource::BrandPoi => summary.snapped_brand_poi += 1,
                SnapSource::FootprintCentroid => summary.snapped_footprint_centroid += 1,
            }
        }
    }

    // Brand POIs can improve even properties with no footprint match.
    if snap_coords {
        for (pid, &(poi_lat, poi_lng)) in brand_poi {
            if matches.property_footprints.contains_key(pid) {
                continue;
            }
            let Some(prop) = registry.get_mut(pid) else {
                continue;
            };
            let (Some(old_lat), Some(old_lng)) = (prop.lat, prop.lng) else {
                continue;
            };
            let poi_dist = haversine_m(old_lat, old_lng, poi_lat, poi_lng);
            if poi_dist > brand_poi_gate_m {
                // Wrong-store match (same brand, wrong city).
                continue;
            }
            prop.pre_snap_lat = Some(old_lat);
            prop.pre_snap_lng = Some(old_lng);
            prop.lat = Some(round7(poi_lat));
            prop.lng = Some(round7(poi_lng));
            prop.footprint_snap_source = Some(SnapSource::BrandPoi);
            summary.snapped_brand_poi += 1;
            snap_distances.push(poi_dist);

            if let Some(fp_id) = index.find_containing(poi_lat, poi_lng).into_iter().next() {
                apply_footprint(prop, index, &fp_id, FootprintMatchMethod::BrandContainment);
            }
        }
    }

    summary.coords_snapped = summary.snapped_brand_poi + summary.snapped_footprint_centroid;
    if !snap_distances.is_empty() {
        #[allow(clippy::cast_precision_loss)]
        let avg = snap_distances.iter().sum::<f64>() / snap_distances.len() as f64;
        summary.avg_snap_distance_m = (avg * 10.0).round() / 10.0;
        summary.max_snap_distance_m =
            (snap_distances.iter().fold(0.0_f64, |a, &b| a.max(b)) * 10.0).round() / 10.0;
    }

    if !dry_run {
        registry.save()?;
        log::info!(
            "Enriched {} properties with footprint data ({} snapped: {} brand POI, {} centroid)",
            summary.enriched,
            summary.coords_snapped,
            summary.snapped_brand_poi,
            summary.snapped_footprint_centroid
        );
    }

    Ok(summary)
}
