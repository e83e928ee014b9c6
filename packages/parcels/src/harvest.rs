//! Parcel harvesting: walk registry properties, resolve each city's
//! municipal service, and fetch the parcel containing the property.
//!
//! Harvested features map their attributes through the service's
//! `field_map` into canonical parcel fields, get zoning attached where
//! a zoning layer exists, and are stored deduplicated. Properties in
//! cities with no registered service, or whose point hits no parcel,
//! are recorded as `no_coverage` so re-runs skip them.

use geo::Contains;

use prop_map_registry::PropertyRegistry;

use crate::arcgis::{ArcGisFeature, FeatureQuery, rings_to_geojson};
use crate::services::{ServiceConfig, ServiceRegistry};
use crate::store::{ParcelProps, ParcelStore};
use crate::ParcelsError;

/// Summary of a harvest pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HarvestSummary {
    pub properties_seen: usize,
    pub already_mapped: usize,
    pub no_coords: usize,
    pub no_service: usize,
    pub no_parcel: usize,
    pub mapped: usize,
    pub parcels_added: usize,
}

fn attribute_string(
    attributes: &serde_json::Map<String, serde_json::Value>,
    key: Option<&String>,
) -> Option<String> {
    let value = attributes.get(key?)?;
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn attribute_f64(
    attributes: &serde_json::Map<String, serde_json::Value>,
    key: Option<&String>,
) -> Option<f64> {
    attributes.get(key?)?.as_f64()
}

/// Maps a harvested feature's attributes into canonical parcel props
/// via the service `field_map`.
#[must_use]
pub fn map_fields(service: &ServiceConfig, feature: &ArcGisFeature) -> ParcelProps {
    let map = &service.field_map;
    let attrs = &feature.attributes;
    ParcelProps {
        pin: attribute_string(attrs, map.get("pin")),
        arn: attribute_string(attrs, map.get("arn")),
        address: attribute_string(attrs, map.get("address")),
        city: attribute_string(attrs, map.get("city")),
        zone_code: attribute_string(attrs, map.get("zone_code")),
        zone_desc: attribute_string(attrs, map.get("zone_desc")),
        area_sqm: attribute_f64(attrs, map.get("area_sqm")),
        assessment: attribute_string(attrs, map.get("assessment")),
        property_use: attribute_string(attrs, map.get("property_use")),
        legal_desc: attribute_string(attrs, map.get("legal_desc")),
        ..ParcelProps::default()
    }
}

/// Picks the feature whose polygon actually contains the point,
/// falling back to the first feature with geometry.
fn pick_containing<'a>(
    features: &'a [ArcGisFeature],
    lat: f64,
    lng: f64,
) -> Option<&'a ArcGisFeature> {
    let point = geo::Point::new(lng, lat);
    let mut first_with_geometry = None;
    for feature in features {
        let Some(geometry) = feature.geometry.as_ref().and_then(rings_to_geojson) else {
            continue;
        };
        if first_with_geometry.is_none() {
            first_with_geometry = Some(feature);
        }
        let Ok(geo_geom) = geo::Geometry::<f64>::try_from(geometry.value) else {
            continue;
        };
        let contains = match geo_geom {
            geo::Geometry::Polygon(ref p) => p.contains(&point),
            geo::Geometry::MultiPolygon(ref mp) => mp.contains(&point),
            _ => false,
        };
        if contains {
            return Some(feature);
        }
    }
    first_with_geometry
}

/// Harvests parcels for every registry property with coordinates that
/// is not yet mapped. The store is saved once at the end.
///
/// # Errors
///
/// Returns [`ParcelsError`] on store persistence failure. Individual
/// query failures degrade to `no_parcel` entries.
pub async fn harvest(
    registry: &PropertyRegistry,
    services: &ServiceRegistry,
    store: &mut ParcelStore,
    source: &impl FeatureQuery,
    limit: Option<usize>,
) -> Result<HarvestSummary, ParcelsError> {
    let mut summary = HarvestSummary::default();
    let mut attempted = 0_usize;

    for (pid, prop) in registry.iter() {
        summary.properties_seen += 1;

        if store.property_to_parcel().contains_key(pid)
            || store.no_coverage().iter().any(|p| p == pid)
        {
            summary.already_mapped += 1;
            continue;
        }
        let (Some(lat), Some(lng)) = (prop.lat, prop.lng) else {
            summary.no_coords += 1;
            continue;
        };
        let Some((key, service)) = services.resolve_entry(&prop.city) else {
            summary.no_service += 1;
            continue;
        };
        let key = key.to_string();

        if limit.is_some_and(|l| attempted >= l) {
            break;
        }
        attempted += 1;

        let features = source
            .query_point(&service.parcels_url, lat, lng, service.srid, "*", 50.0)
            .await;
        let Some(feature) = pick_containing(&features, lat, lng) else {
            store.mark_no_coverage(pid);
            summary.no_parcel += 1;
            continue;
        };
        let Some(geometry) = feature.geometry.as_ref().and_then(rings_to_geojson) else {
            store.mark_no_coverage(pid);
            summary.no_parcel += 1;
            continue;
        };

        let mut props = map_fields(service, feature);

        // Attach zoning from the dedicated layer when configured and
        // the parcel layer itself carried none.
        if props.zone_code.is_none() {
            if let Some(zoning_url) = &service.zoning_url {
                if let Some(zone_attrs) = source
                    .query_point(zoning_url, lat, lng, service.srid, "*", 10.0)
                    .await
                    .first()
                    .map(|f| f.attributes.clone())
                {
                    props.zone_code = attribute_string(&zone_attrs, service.field_map.get("zone_code"));
                    props.zone_desc = attribute_string(&zone_attrs, service.field_map.get("zone_desc"));
                }
            }
        }

        let (pcl_id, added) = store.add_parcel(&key, geometry, props);
        if added {
            summary.parcels_added += 1;
        }
        store.set_property_mapping(pid, &pcl_id);
        summary.mapped += 1;
    }

    store.save()?;
    log::info!(
        "Harvest: {} mapped ({} new parcels), {} no coverage, {} no service",
        summary.mapped,
        summary.parcels_added,
        summary.no_parcel,
        summary.no_service
    );
    Ok(summary)
}
