//! The on-disk parcel cache (`parcels.json`).
//!
//! Stores harvested parcel polygons as WGS84 GeoJSON with stable
//! `PCL<NNNNN>` IDs, the property → parcel mapping, and the list of
//! properties with no municipal coverage. Dedup key is
//! `(municipality, pin-or-arn)`; parcels without either identifier
//! are kept as-is.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ParcelsError;

/// Attributes carried on each stored parcel feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelProps {
    pub pcl_id: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_sqm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid_lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid_lng: Option<f64>,
}

/// One stored parcel feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelFeature {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub geometry: geojson::Geometry,
    pub properties: ParcelProps,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ParcelsMeta {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    by_municipality: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ParcelsDoc {
    #[serde(default)]
    meta: ParcelsMeta,
    #[serde(default)]
    features: Vec<ParcelFeature>,
    #[serde(default)]
    property_to_parcel: BTreeMap<String, String>,
    #[serde(default)]
    no_coverage: Vec<String>,
}

/// Summary of an add pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AddSummary {
    pub added: usize,
    pub skipped_dups: usize,
}

/// The parcels.json manager.
#[derive(Debug)]
pub struct ParcelStore {
    path: PathBuf,
    doc: ParcelsDoc,
    dedup_to_pcl: HashMap<String, String>,
}

impl ParcelStore {
    /// Opens the store, starting empty if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ParcelsError`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ParcelsError> {
        let path = path.into();
        let doc: ParcelsDoc = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            ParcelsDoc::default()
        };
        let mut dedup_to_pcl = HashMap::new();
        for feature in &doc.features {
            if let Some(key) = dedup_key(&feature.properties) {
                dedup_to_pcl.insert(key, feature.properties.pcl_id.clone());
            }
        }
        log::info!(
            "Parcel store: {} parcels loaded from {}",
            doc.features.len(),
            path.display()
        );
        Ok(Self {
            path,
            doc,
            dedup_to_pcl,
        })
    }

    /// Number of stored parcels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.features.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.features.is_empty()
    }

    /// The property → parcel mapping.
    #[must_use]
    pub const fn property_to_parcel(&self) -> &BTreeMap<String, String> {
        &self.doc.property_to_parcel
    }

    /// Properties recorded as having no municipal parcel coverage.
    #[must_use]
    pub fn no_coverage(&self) -> &[String] {
        &self.doc.no_coverage
    }

    fn next_pcl_id(&self) -> String {
        let max = self
            .doc
            .features
            .iter()
            .filter_map(|f| f.properties.pcl_id.strip_prefix("PCL"))
            .filter_map(|digits| digits.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("PCL{:05}", max + 1)
    }

    /// Adds one parcel, deduplicating by `(municipality, pin|arn)`.
    /// Returns the parcel's (possibly pre-existing) PCL ID and whether
    /// it was newly added. The centroid is computed from the geometry
    /// when absent.
    pub fn add_parcel(
        &mut self,
        municipality: &str,
        geometry: geojson::Geometry,
        mut props: ParcelProps,
    ) -> (String, bool) {
        props.municipality = municipality.to_string();

        if let Some(key) = dedup_key(&props) {
            if let Some(existing) = self.dedup_to_pcl.get(&key) {
                return (existing.clone(), false);
            }
        }

        let pcl_id = self.next_pcl_id();
        props.pcl_id.clone_from(&pcl_id);
        if props.centroid_lat.is_none() {
            if let Some((lng, lat)) = ring_centroid(&geometry) {
                props.centroid_lat = Some(lat);
                props.centroid_lng = Some(lng);
            }
        }
        if let Some(key) = dedup_key(&props) {
            self.dedup_to_pcl.insert(key, pcl_id.clone());
        }
        self.doc.features.push(ParcelFeature {
            feature_type: "Feature".to_string(),
            geometry,
            properties: props,
        });
        (pcl_id, true)
    }

    /// Links a property to a parcel.
    pub fn set_property_mapping(&mut self, prop_id: &str, pcl_id: &str) {
        self.doc
            .property_to_parcel
            .insert(prop_id.to_string(), pcl_id.to_string());
    }

    /// Marks a property as outside all harvested coverage.
    pub fn mark_no_coverage(&mut self, prop_id: &str) {
        if !self.doc.no_coverage.iter().any(|p| p == prop_id) {
            self.doc.no_coverage.push(prop_id.to_string());
        }
    }

    /// Looks up a parcel's attributes by PCL ID.
    #[must_use]
    pub fn get_parcel(&self, pcl_id: &str) -> Option<&ParcelProps> {
        self.doc
            .features
            .iter()
            .find(|f| f.properties.pcl_id == pcl_id)
            .map(|f| &f.properties)
    }

    /// Converts the stored parcels into a GeoJSON feature collection
    /// suitable for [`prop_map_spatial::PolygonIndex`].
    ///
    /// # Errors
    ///
    /// Returns [`ParcelsError`] if a properties block fails to
    /// serialize (it cannot in practice).
    pub fn to_feature_collection(&self) -> Result<geojson::FeatureCollection, ParcelsError> {
        let mut features = Vec::with_capacity(self.doc.features.len());
        for feature in &self.doc.features {
            let props = match serde_json::to_value(&feature.properties)? {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            features.push(geojson::Feature {
                bbox: None,
                geometry: Some(feature.geometry.clone()),
                id: None,
                properties: Some(props),
                foreign_members: None,
            });
        }
        Ok(geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }

    /// Writes the store atomically, recomputing meta.
    ///
    /// # Errors
    ///
    /// Returns [`ParcelsError`] on serialization or write failure.
    pub fn save(&mut self) -> Result<(), ParcelsError> {
        let mut by_municipality: BTreeMap<String, usize> = BTreeMap::new();
        for feature in &self.doc.features {
            *by_municipality
                .entry(feature.properties.municipality.clone())
                .or_default() += 1;
        }
        self.doc.meta = ParcelsMeta {
            total: self.doc.features.len(),
            by_municipality,
        };
        let content = serde_json::to_string_pretty(&self.doc)?;
        prop_map_coords::atomic_write(&self.path, content.as_bytes())?;
        log::info!("Saved {} parcels to {}", self.doc.meta.total, self.path.display());
        Ok(())
    }
}

fn dedup_key(props: &ParcelProps) -> Option<String> {
    let identifier = props
        .pin
        .as_deref()
        .filter(|p| !p.is_empty())
        .or(props.arn.as_deref().filter(|a| !a.is_empty()))?;
    Some(format!("{}:{identifier}", props.municipality))
}

/// Average of the exterior ring coordinates as (lng, lat).
fn ring_centroid(geometry: &geojson::Geometry) -> Option<(f64, f64)> {
    let ring = match &geometry.value {
        geojson::Value::Polygon(rings) => rings.first()?,
        geojson::Value::MultiPolygon(polys) => polys.first()?.first()?,
        _ => return None,
    };
    if ring.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = ring.len() as f64;
    let (sum_lng, sum_lat) = ring
        .iter()
        .fold((0.0, 0.0), |(x, y), pos| (x + pos[0], y + pos[1]));
    Some((
        (sum_lng / n * 1e7).round() / 1e7,
        (sum_lat / n * 1e7).round() / 1e7,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_geometry(lat: f64, lng: f64, half: f64) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![lng - half, lat - half],
            vec![lng + half, lat - half],
            vec![lng + half, lat + half],
            vec![lng - half, lat + half],
            vec![lng - half, lat - half],
        ]]))
    }

    fn store(name: &str) -> ParcelStore {
        let path = std::env::temp_dir().join(format!(
            "parcel-store-{name}-{}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        ParcelStore::open(path).unwrap()
    }

    fn props_with_pin(pin: &str) -> ParcelProps {
        ParcelProps {
            pin: Some(pin.to_string()),
            ..ParcelProps::default()
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let mut s = store("mono");
        let (a, added_a) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props_with_pin("111"));
        let (b, added_b) = s.add_parcel("hamilton", square_geometry(43.26, -79.86, 0.001), props_with_pin("222"));
        assert!(added_a && added_b);
        assert_eq!(a, "PCL00001");
        assert_eq!(b, "PCL00002");
    }

    #[test]
    fn dedup_by_municipality_and_pin() {
        let mut s = store("dedup");
        let (a, _) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props_with_pin("111"));
        let (b, added) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props_with_pin("111"));
        assert!(!added);
        assert_eq!(a, b);
        // Same PIN in another municipality is a different parcel.
        let (_, added) = s.add_parcel("guelph", square_geometry(43.55, -80.25, 0.001), props_with_pin("111"));
        assert!(added);
    }

    #[test]
    fn arn_is_fallback_identifier() {
        let mut s = store("arn");
        let props = ParcelProps {
            arn: Some("2518000".to_string()),
            ..ParcelProps::default()
        };
        let (_, added) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props.clone());
        assert!(added);
        let (_, added) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props);
        assert!(!added);
    }

    #[test]
    fn centroid_is_computed_on_add() {
        let mut s = store("centroid");
        let (pcl_id, _) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props_with_pin("111"));
        let props = s.get_parcel(&pcl_id).unwrap();
        // The closing vertex repeats the first corner, pulling the
        // plain average slightly off-center; it stays within the ring.
        assert!((props.centroid_lat.unwrap() - 43.25).abs() < 0.001);
        assert!((props.centroid_lng.unwrap() - -79.86).abs() < 0.001);
    }

    #[test]
    fn save_round_trips_with_mapping() {
        let path = std::env::temp_dir().join(format!(
            "parcel-roundtrip-{}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        let mut s = ParcelStore::open(&path).unwrap();
        let (pcl_id, _) = s.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props_with_pin("111"));
        s.set_property_mapping("P00001", &pcl_id);
        s.mark_no_coverage("P00099");
        s.mark_no_coverage("P00099");
        s.save().unwrap();

        let reopened = ParcelStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.property_to_parcel()["P00001"], pcl_id);
        assert_eq!(reopened.no_coverage(), ["P00099"]);
        // Dedup survives reopen.
        let mut reopened = reopened;
        let (existing, added) =
            reopened.add_parcel("hamilton", square_geometry(43.25, -79.86, 0.001), props_with_pin("111"));
        assert!(!added);
        assert_eq!(existing, pcl_id);
        let _ = fs::remove_file(&path);
    }
}
