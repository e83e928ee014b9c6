#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Building footprint matching and coordinate snapping.
//!
//! Geocoded pins frequently land in the parking lot next to the
//! building. [`matcher`] links each property to a footprint polygon
//! (containment first, then a short proximity fallback), and
//! [`enrich`] writes the footprint fields onto the registry and moves
//! each pin to the best available anchor: a brand POI from scraper
//! data beats the building centroid, which beats the geocoded point.

pub mod enrich;
pub mod matcher;

use thiserror::Error;

/// Property name carrying the footprint ID in the GeoJSON input.
pub const FP_ID_PROPERTY: &str = "fp_id";

/// Errors from footprint processing.
#[derive(Debug, Error)]
pub enum FootprintsError {
    /// Reading or writing a data file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry persistence failed.
    #[error(transparent)]
    Registry(#[from] prop_map_registry::RegistryError),
}
