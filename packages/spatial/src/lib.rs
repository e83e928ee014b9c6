#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over polygon feature collections.
//!
//! Building footprints and municipal parcels share the same query
//! surface: point-in-polygon containment, nearest-within-threshold,
//! area, and viewport scans. One [`PolygonIndex`] serves both; the ID
//! property name (`fp_id` / `pcl_id`) is the only difference.
//!
//! The nearest query gates candidates with two rough constants: a
//! degree buffer of `max_m / 79 000` and a degree→meter scale of
//! 95 000 (midpoint of Ontario meter-per-degree values). They only
//! gate candidates, never report distance; distances shown to users
//! always come from haversine.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use geo::{BoundingRect, Centroid, Contains, Distance, Euclidean, MultiPolygon, Point};
use geojson::{FeatureCollection, GeoJson};
use rstar::{AABB, RTree, RTreeObject};
use serde_json::Value;
use thiserror::Error;

/// Errors from loading a polygon index.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Reading the GeoJSON file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a GeoJSON feature collection.
    #[error("GeoJSON error: {0}")]
    Geojson(#[from] geojson::Error),
}

/// Conservative longitude meters-per-degree at Ontario latitudes; used
/// to convert a meter threshold into a candidate-gating degree buffer.
const METERS_PER_DEG_BUFFER: f64 = 79_000.0;

/// Midpoint of Ontario lat/lng meter-per-degree values; used to scale
/// rough degree distances when gating nearest candidates.
const METERS_PER_DEG_SCALE: f64 = 95_000.0;

const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// A polygon stored in the R-tree with its feature id.
struct PolygonEntry {
    idx: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

struct StoredFeature {
    id: String,
    polygon: MultiPolygon<f64>,
    properties: serde_json::Map<String, Value>,
}

/// R-tree spatial index over a polygon feature collection.
///
/// Construct once with [`PolygonIndex::load`] (or
/// [`PolygonIndex::from_collection`]); queries take `&self` and are
/// safe to run concurrently after the build.
pub struct PolygonIndex {
    features: Vec<StoredFeature>,
    by_id: HashMap<String, usize>,
    tree: RTree<PolygonEntry>,
}

impl PolygonIndex {
    /// Loads a GeoJSON feature collection and builds the index.
    /// Features missing the `id_property` or carrying unusable
    /// geometry are dropped with a warning. A missing file downgrades
    /// to an empty index: queries simply return nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the file exists but cannot be read
    /// or parsed as GeoJSON.
    pub fn load(path: &Path, id_property: &str) -> Result<Self, SpatialError> {
        if !path.exists() {
            log::warn!("Polygon file not found: {}", path.display());
            return Ok(Self::from_collection(
                FeatureCollection {
                    bbox: None,
                    features: Vec::new(),
                    foreign_members: None,
                },
                id_property,
            ));
        }
        let raw = fs::read_to_string(path)?;
        let geojson: GeoJson = raw.parse()?;
        let collection = FeatureCollection::try_from(geojson)?;
        let index = Self::from_collection(collection, id_property);
        log::info!(
            "Loaded {} polygons into spatial index from {}",
            index.len(),
            path.display()
        );
        Ok(index)
    }

    /// Builds the index from an in-memory feature collection.
    #[must_use]
    pub fn from_collection(collection: FeatureCollection, id_property: &str) -> Self {
        let mut features: Vec<StoredFeature> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for feature in collection.features {
            let properties = feature.properties.unwrap_or_default();
            let Some(id) = properties.get(id_property).and_then(Value::as_str) else {
                continue;
            };
            if id.is_empty() || by_id.contains_key(id) {
                continue;
            }
            let Some(polygon) = feature
                .geometry
                .as_ref()
                .and_then(geometry_to_multipolygon)
            else {
                log::warn!("Dropping {id}: unusable geometry");
                continue;
            };
            by_id.insert(id.to_string(), features.len());
            features.push(StoredFeature {
                id: id.to_string(),
                polygon,
                properties,
            });
        }

        let entries: Vec<PolygonEntry> = features
            .iter()
            .enumerate()
            .filter_map(|(idx, feature)| {
                feature.polygon.bounding_rect().map(|rect| PolygonEntry {
                    idx,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        Self {
            features,
            by_id,
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the index holds no polygons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// IDs of polygons containing the point, in insertion order.
    /// Usually 0 or 1, but overlapping features can return several.
    #[must_use]
    pub fn find_containing(&self, lat: f64, lng: f64) -> Vec<String> {
        let point = Point::new(lng, lat);
        let query = AABB::from_point([lng, lat]);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter(|entry| self.features[entry.idx].polygon.contains(&point))
            .map(|entry| entry.idx)
            .collect();
        hits.sort_unstable();
        hits.iter().map(|&i| self.features[i].id.clone()).collect()
    }

    /// The nearest polygon within `max_m` meters of the point, if any.
    ///
    /// Candidates come from an envelope buffered by `max_m / 79 000`
    /// degrees; candidate distances are Euclidean degree distances
    /// scaled by 95 000 m/degree. Ties break to the lowest ID.
    #[must_use]
    pub fn find_nearest(&self, lat: f64, lng: f64, max_m: f64) -> Option<String> {
        let point = Point::new(lng, lat);
        let buffer_deg = max_m / METERS_PER_DEG_BUFFER;
        let query = AABB::from_corners(
            [lng - buffer_deg, lat - buffer_deg],
            [lng + buffer_deg, lat + buffer_deg],
        );

        let mut best: Option<(f64, &str)> = None;
        for entry in self.tree.locate_in_envelope_intersecting(&query) {
            let feature = &self.features[entry.idx];
            let dist_m = Euclidean.distance(&feature.polygon, &point) * METERS_PER_DEG_SCALE;
            if dist_m > max_m {
                continue;
            }
            let candidate = (dist_m, feature.id.as_str());
            let better = best.is_none_or(|(d, id)| {
                dist_m < d || (dist_m == d && feature.id.as_str() < id)
            });
            if better {
                best = Some(candidate);
            }
        }
        best.map(|(_, id)| id.to_string())
    }

    /// The properties map of a feature by ID.
    #[must_use]
    pub fn get_feature(&self, id: &str) -> Option<&serde_json::Map<String, Value>> {
        self.by_id.get(id).map(|&i| &self.features[i].properties)
    }

    /// The GeoJSON geometry of a feature by ID.
    #[must_use]
    pub fn get_polygon_geojson(&self, id: &str) -> Option<geojson::Geometry> {
        self.by_id
            .get(id)
            .map(|&i| geojson::Geometry::new((&self.features[i].polygon).into()))
    }

    /// Centroid of a feature's polygon as (lat, lng).
    #[must_use]
    pub fn centroid(&self, id: &str) -> Option<(f64, f64)> {
        let &i = self.by_id.get(id)?;
        self.features[i].polygon.centroid().map(|c| (c.y(), c.x()))
    }

    /// Approximate polygon area in square meters, to 0.1.
    ///
    /// Shoelace formula in a local equirectangular frame anchored at
    /// the first exterior vertex — plenty for building- and
    /// parcel-sized polygons.
    #[must_use]
    pub fn get_area_sqm(&self, id: &str) -> Option<f64> {
        let &i = self.by_id.get(id)?;
        let polygon = self.features[i].polygon.0.first()?;
        let coords: Vec<(f64, f64)> = polygon.exterior().coords().map(|c| (c.x, c.y)).collect();
        if coords.len() < 4 {
            return None;
        }

        let centroid_lat = polygon.centroid().map_or(coords[0].1, |c| c.y());
        let m_per_deg_lng = METERS_PER_DEG_LAT * centroid_lat.to_radians().cos();
        let (ref_lng, ref_lat) = coords[0];

        let projected: Vec<(f64, f64)> = coords
            .iter()
            .map(|(lng, lat)| {
                (
                    (lng - ref_lng) * m_per_deg_lng,
                    (lat - ref_lat) * METERS_PER_DEG_LAT,
                )
            })
            .collect();

        let mut area = 0.0;
        for i in 0..projected.len() {
            let j = (i + 1) % projected.len();
            area += projected[i].0 * projected[j].1;
            area -= projected[j].0 * projected[i].1;
        }
        Some((area.abs() / 2.0 * 10.0).round() / 10.0)
    }

    /// Features whose stored centroid falls inside the bbox. Viewport
    /// queries are small; a linear scan over stored centroids is fine.
    #[must_use]
    pub fn features_in_bbox(
        &self,
        south: f64,
        west: f64,
        north: f64,
        east: f64,
    ) -> Vec<geojson::Feature> {
        self.features
            .iter()
            .filter(|feature| {
                let lat = feature.properties.get("centroid_lat").and_then(Value::as_f64);
                let lng = feature.properties.get("centroid_lng").and_then(Value::as_f64);
                match (lat, lng) {
                    (Some(lat), Some(lng)) => {
                        (south..=north).contains(&lat) && (west..=east).contains(&lng)
                    }
                    _ => false,
                }
            })
            .map(|feature| geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new((&feature.polygon).into())),
                id: None,
                properties: Some(feature.properties.clone()),
                foreign_members: None,
            })
            .collect()
    }
}

/// Converts a GeoJSON geometry to a [`MultiPolygon`], dropping
/// degenerate rings (fewer than 4 positions or non-finite
/// coordinates). Returns `None` when nothing usable remains.
fn geometry_to_multipolygon(geometry: &geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.value.clone().try_into().ok()?;
    let multi = match geo_geom {
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
        _ => return None,
    };
    let repaired: Vec<geo::Polygon<f64>> = multi
        .0
        .into_iter()
        .filter(|polygon| {
            let exterior = polygon.exterior();
            exterior.coords().count() >= 4
                && exterior.coords().all(|c| c.x.is_finite() && c.y.is_finite())
        })
        .collect();
    if repaired.is_empty() {
        None
    } else {
        Some(MultiPolygon(repaired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A square polygon feature around (lat, lng) with the given half
    /// size in degrees.
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
            properties: serde_json::from_value(json!({
                "fp_id": id,
                "centroid_lat": lat,
                "centroid_lng": lng,
            }))
            .unwrap(),
            foreign_members: None,
        }
    }

    fn index(features: Vec<geojson::Feature>) -> PolygonIndex {
        PolygonIndex::from_collection(
            FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
            "fp_id",
        )
    }

    #[test]
    fn containment_hits_inside_point() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.001)]);
        assert_eq!(idx.find_containing(43.65, -79.38), vec!["fp_1"]);
        assert!(idx.find_containing(43.66, -79.38).is_empty());
    }

    #[test]
    fn containment_respects_true_polygon_not_envelope() {
        // A triangle whose envelope covers the query point but whose
        // shape does not.
        let ring = vec![
            vec![-79.39, 43.64],
            vec![-79.37, 43.64],
            vec![-79.39, 43.66],
            vec![-79.39, 43.64],
        ];
        let feature = geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![ring]))),
            id: None,
            properties: serde_json::from_value(json!({"fp_id": "fp_tri"})).unwrap(),
            foreign_members: None,
        };
        let idx = index(vec![feature]);
        // Near the hypotenuse's far corner: inside envelope, outside triangle.
        assert!(idx.find_containing(43.6595, -79.3705).is_empty());
    }

    #[test]
    fn nearest_within_threshold() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.0001)]);
        // ~0.0005 degrees south of the polygon edge: ~45m at the 95k scale.
        assert_eq!(
            idx.find_nearest(43.6494, -79.38, 100.0),
            Some("fp_1".to_string())
        );
        assert_eq!(idx.find_nearest(43.6494, -79.38, 10.0), None);
    }

    #[test]
    fn nearest_prefers_closer_polygon_and_breaks_ties_by_id() {
        let idx = index(vec![
            square("fp_b", 43.6500, -79.3800, 0.0001),
            square("fp_a", 43.6510, -79.3800, 0.0001),
        ]);
        // Closer to fp_b.
        assert_eq!(
            idx.find_nearest(43.6503, -79.3800, 200.0),
            Some("fp_b".to_string())
        );

        // Identical geometry under two IDs: an exact tie, resolved to
        // the lowest ID.
        let idx = index(vec![
            square("fp_b", 43.6500, -79.3800, 0.0001),
            square("fp_a", 43.6500, -79.3800, 0.0001),
        ]);
        assert_eq!(
            idx.find_nearest(43.6504, -79.3800, 200.0),
            Some("fp_a".to_string())
        );
    }

    #[test]
    fn area_of_known_square() {
        // 0.001 x 0.001 degrees at 43.65N: ~111.32m x ~80.5m ≈ 8967 m².
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.0005)]);
        let area = idx.get_area_sqm("fp_1").unwrap();
        assert!((8_000.0..10_000.0).contains(&area), "area was {area}");
    }

    #[test]
    fn bbox_scan_filters_by_centroid() {
        let idx = index(vec![
            square("fp_1", 43.65, -79.38, 0.001),
            square("fp_2", 44.65, -80.38, 0.001),
        ]);
        let hits = idx.features_in_bbox(43.6, -79.4, 43.7, -79.3);
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].properties.as_ref().unwrap()["fp_id"],
            json!("fp_1")
        );
    }

    #[test]
    fn degenerate_and_unidentified_features_are_dropped() {
        let bad_ring = vec![vec![-79.38, 43.65], vec![-79.37, 43.65], vec![-79.38, 43.65]];
        let degenerate = geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![bad_ring]))),
            id: None,
            properties: serde_json::from_value(json!({"fp_id": "fp_bad"})).unwrap(),
            foreign_members: None,
        };
        let mut unnamed = square("", 43.65, -79.38, 0.001);
        unnamed.properties.as_mut().unwrap().remove("fp_id");
        let idx = index(vec![degenerate, unnamed, square("fp_ok", 43.0, -79.0, 0.001)]);
        assert_eq!(idx.len(), 1);
        assert!(idx.get_feature("fp_bad").is_none());
        assert!(idx.get_feature("fp_ok").is_some());
    }

    #[test]
    fn missing_file_downgrades_to_empty_index() {
        let idx = PolygonIndex::load(Path::new("/nonexistent/footprints.json"), "fp_id").unwrap();
        assert!(idx.is_empty());
        assert!(idx.find_containing(43.65, -79.38).is_empty());
        assert!(idx.find_nearest(43.65, -79.38, 100.0).is_none());
    }

    #[test]
    fn feature_lookup_and_centroid() {
        let idx = index(vec![square("fp_1", 43.65, -79.38, 0.001)]);
        let props = idx.get_feature("fp_1").unwrap();
        assert_eq!(props["centroid_lat"], json!(43.65));
        let (lat, lng) = idx.centroid("fp_1").unwrap();
        assert!((lat - 43.65).abs() < 1e-9);
        assert!((lng - -79.38).abs() < 1e-9);
        assert!(idx.get_polygon_geojson("fp_1").is_some());
        assert!(idx.get_polygon_geojson("fp_x").is_none());
    }
}
