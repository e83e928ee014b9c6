#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core data model shared across the pipeline.
//!
//! A [`Property`] is the canonical P-keyed entity. It is created once
//! (by the RT bootstrap, the GeoWarehouse resolver, or the brand
//! importer) and subsequently enriched: footprint matching and
//! coordinate snapping add `footprint_*` fields, parcel consolidation
//! adds `parcel_*` fields. Derived fields are always optional and are
//! omitted from JSON when absent so the registry document stays
//! readable.

use serde::{Deserialize, Serialize};

/// Where a property record came from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    /// Real-estate transaction records.
    Rt,
    /// GeoWarehouse municipal assessment records.
    Gw,
    /// Brand store directories.
    Brand,
}

/// How a property was linked to its building footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FootprintMatchMethod {
    /// The property coordinate lies inside the footprint polygon.
    Containment,
    /// Nearest footprint within the fallback distance.
    Proximity,
    /// Containment re-evaluated at the brand POI coordinate.
    BrandContainment,
}

/// Which anchor a property's coordinates were snapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnapSource {
    /// Store-locator POI coordinates from scraper data.
    BrandPoi,
    /// Centroid of the matched building footprint.
    FootprintCentroid,
}

/// Snapshot of GeoWarehouse fields embedded in a property record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GwData {
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub zoning: String,
    #[serde(default)]
    pub assessed_value: String,
    #[serde(default)]
    pub valuation_date: String,
    #[serde(default)]
    pub property_code: String,
    #[serde(default)]
    pub property_description: String,
    #[serde(default)]
    pub ownership_type: String,
    #[serde(default)]
    pub property_type: String,
    #[serde(default)]
    pub owner_names: String,
    #[serde(default)]
    pub owner_mailing_address: String,
}

/// The canonical property record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default = "default_province")]
    pub province: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postal_code: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Original geocoded coordinates, kept when the property was
    /// snapped to a higher-confidence anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_snap_lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_snap_lng: Option<f64>,
    #[serde(default)]
    pub rt_ids: Vec<String>,
    #[serde(default)]
    pub transaction_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gw_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw_data: Option<GwData>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,

    // Parcel consolidation fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_area_sqm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoning_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoning_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_assessment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_property_use: Option<String>,
    /// Sibling P-IDs sharing the same legal parcel (self excluded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_group: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_brands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_building_count: Option<usize>,

    // Footprint enrichment fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint_area_sqm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint_building_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint_match_method: Option<FootprintMatchMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint_snap_source: Option<SnapSource>,
}

fn default_province() -> String {
    "ON".to_string()
}

impl Property {
    /// Whether the record carries the given source tag.
    #[must_use]
    pub fn has_source(&self, source: Source) -> bool {
        self.sources.contains(&source)
    }

    /// Adds a source tag if not already present.
    pub fn add_source(&mut self, source: Source) {
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }

    /// Whether this is a brand-only record (no transactions, sole
    /// source `brand`) — the kind merged away by orphan cleanup.
    #[must_use]
    pub fn is_brand_only(&self) -> bool {
        self.rt_ids.is_empty() && self.sources == [Source::Brand]
    }

    /// Clears every parcel consolidation field.
    pub fn clear_parcel_fields(&mut self) {
        self.parcel_id = None;
        self.parcel_pin = None;
        self.parcel_arn = None;
        self.parcel_area_sqm = None;
        self.zoning_code = None;
        self.zoning_desc = None;
        self.parcel_assessment = None;
        self.parcel_property_use = None;
        self.parcel_group = None;
        self.parcel_brands = None;
        self.parcel_building_count = None;
    }

    /// Clears every footprint field and restores pre-snap coordinates
    /// if the property was snapped. Running enrichment after this is
    /// equivalent to running it on a never-enriched registry.
    pub fn clear_footprint_fields(&mut self) {
        self.footprint_id = None;
        self.footprint_area_sqm = None;
        self.footprint_building_type = None;
        self.footprint_match_method = None;
        self.footprint_snap_source = None;
        if let (Some(lat), Some(lng)) = (self.pre_snap_lat.take(), self.pre_snap_lng.take()) {
            self.lat = Some(lat);
            self.lng = Some(lng);
        } else {
            self.pre_snap_lat = None;
            self.pre_snap_lng = None;
        }
    }
}

/// One scraped brand store location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrandStore {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub store_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_province")]
    pub province: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postal_code: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scraped_at: String,
}

impl BrandStore {
    /// Dedup key: (brand, address, city), uppercased.
    #[must_use]
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.brand.trim().to_uppercase(),
            self.address.trim().to_uppercase(),
            self.city.trim().to_uppercase(),
        )
    }

    /// The geocodable "address, city, province" form used as the
    /// coordinate store key for this store.
    #[must_use]
    pub fn geocodable_address(&self) -> String {
        format!("{}, {}, {}", self.address, self.city, self.province)
    }
}

/// One brand-to-property match entry, as stored in the match file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEntry {
    pub brand: String,
    #[serde(default)]
    pub store_name: String,
    pub address: String,
    #[serde(default)]
    pub city: String,
    /// `exact`, `fuzzy (0.87)`, `fuzzy_import`, `new_property`, or
    /// `proximity (14m)`.
    pub method: String,
}
