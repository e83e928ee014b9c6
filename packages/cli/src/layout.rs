//! The on-disk data layout.
//!
//! Every stage reads and writes JSON documents under one root
//! directory; this is the single place that knows the filenames.

use std::path::{Path, PathBuf};

/// Resolves paths under the pipeline data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn coordinates(&self) -> PathBuf {
        self.root.join("coordinates.json")
    }

    pub fn properties(&self) -> PathBuf {
        self.root.join("properties.json")
    }

    pub fn address_index(&self) -> PathBuf {
        self.root.join("address_index.json")
    }

    pub fn brand_matches(&self) -> PathBuf {
        self.root.join("brand_matches.json")
    }

    pub fn brand_unmatched(&self) -> PathBuf {
        self.root.join("brand_unmatched.json")
    }

    pub fn brand_proximity(&self) -> PathBuf {
        self.root.join("brand_proximity.json")
    }

    pub fn footprints(&self) -> PathBuf {
        self.root.join("footprints.json")
    }

    pub fn footprint_matches(&self) -> PathBuf {
        self.root.join("footprint_matches.json")
    }

    pub fn parcels(&self) -> PathBuf {
        self.root.join("parcels").join("parcels.json")
    }

    pub fn services(&self) -> PathBuf {
        self.root.join("parcels").join("services.json")
    }

    pub fn consolidation(&self) -> PathBuf {
        self.root.join("parcels").join("consolidation.json")
    }

    pub fn tenants(&self) -> PathBuf {
        self.root.join("tenants.json")
    }

    /// RT extractor output records.
    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join("extracted").join("active")
    }

    /// GW parser output records (pre-ingest).
    pub fn gw_parsed_dir(&self) -> PathBuf {
        self.root.join("gw_parsed")
    }

    /// Deduplicated GW records with assigned IDs.
    pub fn gw_active_dir(&self) -> PathBuf {
        self.root.join("gw_active")
    }

    /// Scraped brand store files.
    pub fn brands_dir(&self) -> PathBuf {
        self.root.join("brands")
    }
}
