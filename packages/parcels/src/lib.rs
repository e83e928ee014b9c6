#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Municipal parcels: harvesting, storage, and consolidation.
//!
//! Each Ontario municipality publishes parcels through its own ArcGIS
//! endpoint with its own field names and SRID; [`services`] resolves a
//! city to its endpoint config and [`arcgis`] wraps the one capability
//! the pipeline needs (point → intersecting features). Harvested
//! polygons land in the [`store`] under stable `PCL` IDs, and
//! [`consolidate`] projects parcel attributes, sibling groups, and
//! brand assignments back onto the property registry.

pub mod arcgis;
pub mod consolidate;
pub mod harvest;
pub mod services;
pub mod store;

use thiserror::Error;

/// Property name carrying the parcel ID in index features.
pub const PCL_ID_PROPERTY: &str = "pcl_id";

/// Errors from parcel processing.
#[derive(Debug, Error)]
pub enum ParcelsError {
    /// Reading or writing a data file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The services registry is missing — a configuration error, not
    /// a degradable one.
    #[error("Services file not found: {0}")]
    MissingServices(String),

    /// Registry persistence failed.
    #[error(transparent)]
    Registry(#[from] prop_map_registry::RegistryError),

    /// Coordinate projection failed (unsupported SRID in config).
    #[error(transparent)]
    Projection(#[from] prop_map_projection::ProjectionError),
}

/// A brand point of interest, as fed to the consolidator.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandPoi {
    pub brand: String,
    pub lat: f64,
    pub lng: f64,
}

impl BrandPoi {
    /// Collects POIs from scraped brand stores with coordinates.
    #[must_use]
    pub fn from_stores(stores: &[prop_map_registry_models::BrandStore]) -> Vec<Self> {
        stores
            .iter()
            .filter_map(|store| {
                Some(Self {
                    brand: store.brand.clone(),
                    lat: store.lat?,
                    lng: store.lng?,
                })
            })
            .collect()
    }
}
