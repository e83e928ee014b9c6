#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! OpenStreetMap tenant discovery via the Overpass API.
//!
//! Overpass is free and keyless but shared; the client rotates across
//! a set of equivalent public endpoints, enforces a minimum delay
//! between requests, and backs off on 429s. [`enrich`] walks registry
//! properties and records the named commercial POIs around each one.

pub mod client;
pub mod enrich;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::OverpassClient;

/// Errors from Overpass operations.
#[derive(Debug, Error)]
pub enum OsmError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Every configured endpoint failed after retries.
    #[error("All Overpass servers failed after {0} attempts")]
    AllServersFailed(usize),

    /// Reading or writing the tenant store failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tenant store contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named commercial POI near a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// `node/123` or `way/456`.
    pub osm_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_wikidata: Option<String>,
    /// `shop=bakery`, `amenity=restaurant`, …
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub housenumber: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
}
