#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! GeoWarehouse ingestion and registry resolution.
//!
//! The upstream HTML parser produces one JSON record per property
//! detail page. This package owns what happens next: deduplicating
//! those records by PIN (keeping the newest snapshot), assigning
//! stable `GW<NNNNN>` IDs in PIN-sorted order, parsing the MPAC
//! one-line address into components, and resolving each record to a
//! property in the registry — enriching matches and creating new
//! GW-sourced properties for the rest.

pub mod address;
pub mod engine;
pub mod matcher;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use address::{ParsedAddress, parse_mpac_address};

/// Errors from GeoWarehouse processing.
#[derive(Debug, Error)]
pub enum GwError {
    /// Reading or writing record files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record file contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry mutation failed.
    #[error(transparent)]
    Registry(#[from] prop_map_registry::RegistryError),
}

/// Summary section of a parsed GW record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GwSummary {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub owner_names: String,
    #[serde(default)]
    pub legal_description: String,
}

/// Registry section of a parsed GW record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GwRegistrySection {
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub ownership_type: String,
    #[serde(default)]
    pub property_type: String,
}

/// Site & Structure section of a parsed GW record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GwSite {
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub zoning: String,
    #[serde(default)]
    pub property_description: String,
    #[serde(default)]
    pub property_code: String,
    #[serde(default)]
    pub current_assessed_value: String,
    #[serde(default)]
    pub valuation_date: String,
    #[serde(default)]
    pub property_address: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default)]
    pub owner_names_mpac: String,
    #[serde(default)]
    pub owner_mailing_address: String,
}

/// One parsed GeoWarehouse record, as emitted by the HTML parser and
/// enriched with a `gw_id` during ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GwRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gw_id: String,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub gw_source_file: String,
    #[serde(default)]
    pub summary: GwSummary,
    #[serde(default)]
    pub registry: GwRegistrySection,
    #[serde(default)]
    pub site_structure: GwSite,
}

impl GwRecord {
    /// Snapshot of the fields embedded in the property registry.
    #[must_use]
    pub fn to_gw_data(&self) -> prop_map_registry_models::GwData {
        let owner_names = if self.site_structure.owner_names_mpac.is_empty() {
            self.summary.owner_names.clone()
        } else {
            self.site_structure.owner_names_mpac.clone()
        };
        prop_map_registry_models::GwData {
            pin: self.pin.clone(),
            arn: self.site_structure.arn.clone(),
            zoning: self.site_structure.zoning.clone(),
            assessed_value: self.site_structure.current_assessed_value.clone(),
            valuation_date: self.site_structure.valuation_date.clone(),
            property_code: self.site_structure.property_code.clone(),
            property_description: self.site_structure.property_description.clone(),
            ownership_type: self.registry.ownership_type.clone(),
            property_type: self.registry.property_type.clone(),
            owner_names,
            owner_mailing_address: self.site_structure.owner_mailing_address.clone(),
        }
    }

    /// Parses this record's MPAC address into components.
    #[must_use]
    pub fn parsed_address(&self) -> ParsedAddress {
        parse_mpac_address(
            &self.site_structure.property_address,
            &self.site_structure.municipality,
            &self.summary.address,
        )
    }
}
