#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Unified multi-provider coordinate store.
//!
//! Central registry mapping addresses to geocode results from multiple
//! providers (Mapbox, Geocodio, HERE, scraper). Supports consensus
//! selection, divergence reporting, and per-provider pending sets.
//!
//! Store format (`coordinates.json`):
//!
//! ```json
//! {
//!   "meta": {"version": 1, "updated_at": "...", "providers": [...], "total_addresses": 3},
//!   "addresses": {
//!     "NORMALIZED ADDRESS": {
//!       "mapbox":   {"lat": 43.1, "lng": -79.2, "accuracy_type": "rooftop", "geocoded_at": "..."},
//!       "geocodio": {"lat": 43.1, "lng": -79.2, "accuracy_type": "rooftop", "accuracy": 1.0, "geocoded_at": "..."},
//!       "scraper":  {"lat": 43.1, "lng": -79.2, "source": "Harvey's", "scraped_at": "..."}
//!     }
//!   }
//! }
//! ```

pub mod store;

use thiserror::Error;

pub use store::{CoordinateStore, Divergence, ProviderFix, StoreStats, atomic_write};

/// Errors from coordinate store operations.
#[derive(Debug, Error)]
pub enum CoordsError {
    /// Reading or writing the store file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Geocoding providers recognized by the store.
///
/// Declaration order is the canonical preference order used by
/// [`CoordinateStore::best_coords`] when picking a single fix.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    /// Geocodio batch API.
    Geocodio,
    /// Mapbox forward geocoding.
    Mapbox,
    /// HERE forward geocoding.
    Here,
    /// Coordinates lifted from brand store locator pages.
    Scraper,
}

impl Provider {
    /// All providers in canonical preference order.
    pub const ALL: [Self; 4] = [Self::Geocodio, Self::Mapbox, Self::Here, Self::Scraper];
}

/// Haversine distance in meters between two lat/lng points.
#[must_use]
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const R: f64 = 6_371_000.0;
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    R * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}
