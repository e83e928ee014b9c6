#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Brand-to-property matching.
//!
//! Two phases, in order: address matching ([`matcher`]) buckets
//! properties by (street number, city) and scores street-name
//! similarity; proximity matching ([`proximity`]) picks up the
//! leftovers whose coordinates land within a threshold of a property.
//! [`import`] then folds everything into the registry — enriching
//! matched properties, creating brand-only records for the rest, and
//! merging duplicate orphans away.

pub mod import;
pub mod matcher;
pub mod proximity;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use prop_map_registry_models::{BrandStore, MatchEntry};

/// The on-disk match file: P-ID → match entries.
pub type MatchFile = BTreeMap<String, Vec<MatchEntry>>;

/// Errors from brand matching and import.
#[derive(Debug, Error)]
pub enum BrandsError {
    /// Reading or writing a data file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry mutation failed.
    #[error(transparent)]
    Registry(#[from] prop_map_registry::RegistryError),

    /// Orphan cleanup found a match entry pointing at a property that
    /// no longer exists. Aborts the import pass; nothing is written.
    #[error("Orphan cleanup would leave dangling matches for {0}")]
    DanglingMatches(String),
}

/// Loads every brand store file in `dir` (sorted file order, record
/// order within each file).
///
/// # Errors
///
/// Returns [`BrandsError`] if the directory cannot be read; malformed
/// files are skipped with a log line.
pub fn load_brand_stores(dir: &Path) -> Result<Vec<BrandStore>, BrandsError> {
    let mut files: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut stores = Vec::new();
    for path in files {
        match fs::read_to_string(&path)
            .map_err(BrandsError::from)
            .and_then(|raw| Ok(serde_json::from_str::<Vec<BrandStore>>(&raw)?))
        {
            Ok(batch) => stores.extend(batch),
            Err(err) => log::warn!("Skipping {}: {err}", path.display()),
        }
    }
    log::info!("Loaded {} brand stores from {}", stores.len(), dir.display());
    Ok(stores)
}

/// Eagerly-built lookup from (brand, address, city) to the scraped
/// store record, for backfilling coordinates and postal codes during
/// import.
pub struct StoreLookup<'a> {
    by_key: HashMap<(String, String, String), &'a BrandStore>,
}

impl<'a> StoreLookup<'a> {
    /// Indexes the given stores. First record wins on duplicates.
    #[must_use]
    pub fn new(stores: &'a [BrandStore]) -> Self {
        let mut by_key = HashMap::new();
        for store in stores {
            by_key.entry(store.dedup_key()).or_insert(store);
        }
        Self { by_key }
    }

    /// Finds a store by brand/address/city (case-insensitive).
    #[must_use]
    pub fn find(&self, brand: &str, address: &str, city: &str) -> Option<&'a BrandStore> {
        self.by_key
            .get(&(
                brand.trim().to_uppercase(),
                address.trim().to_uppercase(),
                city.trim().to_uppercase(),
            ))
            .copied()
    }
}

/// Reads a match file, or an empty map when absent.
///
/// # Errors
///
/// Returns [`BrandsError`] when the file exists but cannot be parsed.
pub fn load_match_file(path: &Path) -> Result<MatchFile, BrandsError> {
    if !path.exists() {
        return Ok(MatchFile::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Writes a match file atomically.
///
/// # Errors
///
/// Returns [`BrandsError`] on serialization or I/O failure.
pub fn save_match_file(path: &Path, matches: &MatchFile) -> Result<(), BrandsError> {
    let content = serde_json::to_string_pretty(matches)?;
    prop_map_coords::atomic_write(path, content.as_bytes())?;
    Ok(())
}

/// The (brand, address) pairs already present in a match file, for
/// skipping stores the address phase has handled.
#[must_use]
pub fn already_matched(matches: &MatchFile) -> std::collections::HashSet<(String, String)> {
    matches
        .values()
        .flatten()
        .map(|entry| (entry.brand.to_uppercase(), entry.address.to_uppercase()))
        .collect()
}
