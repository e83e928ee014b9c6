#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The canonical property registry.
//!
//! `properties.json` is the single source of truth every pipeline
//! stage enriches. This package owns the document: P-ID allocation
//! (monotonic, never reused), the dedup-key index, meta recomputation,
//! and atomic persistence. The RT bootstrap that seeds the registry
//! from geocoded location clusters lives in [`bootstrap`].

pub mod bootstrap;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use prop_map_address::dedup_key;
use prop_map_coords::atomic_write;
use prop_map_registry_models::Property;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Reading or writing the registry file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file contained invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stage proposed a P-ID that already exists. The registry on
    /// disk is still valid; the stage must abort.
    #[error("Duplicate property ID proposed: {0}")]
    DuplicateId(String),
}

/// Registry document metadata, recomputed on every save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryMeta {
    #[serde(default)]
    pub built: String,
    #[serde(default)]
    pub total_properties: usize,
    #[serde(default)]
    pub total_transactions_linked: usize,
    #[serde(default)]
    pub multi_transaction_properties: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryDoc {
    meta: RegistryMeta,
    properties: BTreeMap<String, Property>,
}

/// The on-disk property registry.
///
/// Properties live in a `BTreeMap`, so serialization is always sorted
/// by P-ID and repeated saves of identical content are byte-identical.
#[derive(Debug)]
pub struct PropertyRegistry {
    path: PathBuf,
    doc: RegistryDoc,
}

impl PropertyRegistry {
    /// Opens the registry at `path`, starting empty if absent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            RegistryDoc::default()
        };
        log::info!(
            "Registry: {} properties loaded from {}",
            doc.properties.len(),
            path.display()
        );
        Ok(Self { path, doc })
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.properties.len()
    }

    /// Whether the registry holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.properties.is_empty()
    }

    /// Looks up a property by P-ID.
    #[must_use]
    pub fn get(&self, prop_id: &str) -> Option<&Property> {
        self.doc.properties.get(prop_id)
    }

    /// Mutable lookup by P-ID.
    pub fn get_mut(&mut self, prop_id: &str) -> Option<&mut Property> {
        self.doc.properties.get_mut(prop_id)
    }

    /// All (P-ID, property) pairs in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Property)> {
        self.doc.properties.iter()
    }

    /// Mutable iteration in ID order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Property)> {
        self.doc.properties.iter_mut()
    }

    /// Whether a P-ID exists.
    #[must_use]
    pub fn contains(&self, prop_id: &str) -> bool {
        self.doc.properties.contains_key(prop_id)
    }

    /// The next free P-ID: scan existing `P<digits>` IDs, take the
    /// max, increment. IDs are never reused, even after deletions.
    #[must_use]
    pub fn next_prop_id(&self) -> String {
        let max = self
            .doc
            .properties
            .keys()
            .filter_map(|id| id.strip_prefix('P'))
            .filter_map(|digits| digits.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("P{:05}", max + 1)
    }

    /// Inserts a new property under a freshly allocated P-ID and
    /// returns the ID.
    pub fn insert_new(&mut self, property: Property) -> String {
        let id = self.next_prop_id();
        self.doc.properties.insert(id.clone(), property);
        id
    }

    /// Inserts a property under an explicit ID.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if the ID is taken —
    /// an invariant violation that must abort the calling stage.
    pub fn insert_with_id(&mut self, prop_id: &str, property: Property) -> Result<(), RegistryError> {
        if self.doc.properties.contains_key(prop_id) {
            return Err(RegistryError::DuplicateId(prop_id.to_string()));
        }
        self.doc.properties.insert(prop_id.to_string(), property);
        Ok(())
    }

    /// Removes a property, returning it if present.
    pub fn remove(&mut self, prop_id: &str) -> Option<Property> {
        self.doc.properties.remove(prop_id)
    }

    /// Builds the dedup-key index: `NORM_ADDRESS|NORM_CITY` → P-ID.
    ///
    /// When two properties share a key (a real property and a
    /// brand-only orphan awaiting cleanup), the first by ID order
    /// wins; orphan cleanup resolves the conflict.
    #[must_use]
    pub fn dedup_index(&self) -> HashMap<String, String> {
        let mut index = HashMap::new();
        for (pid, prop) in &self.doc.properties {
            let key = dedup_key(&prop.address, &prop.city);
            index.entry(key).or_insert_with(|| pid.clone());
        }
        index
    }

    /// Groups P-IDs by dedup key (used by orphan cleanup).
    #[must_use]
    pub fn dedup_groups(&self) -> HashMap<String, Vec<String>> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for (pid, prop) in &self.doc.properties {
            groups
                .entry(dedup_key(&prop.address, &prop.city))
                .or_default()
                .push(pid.clone());
        }
        groups
    }

    /// Current meta block (as of the last save).
    #[must_use]
    pub const fn meta(&self) -> &RegistryMeta {
        &self.doc.meta
    }

    /// Writes the registry atomically, recomputing meta.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if serialization or any file
    /// operation fails; on failure the prior file is left intact.
    pub fn save(&mut self) -> Result<(), RegistryError> {
        let total = self.doc.properties.len();
        let total_rt: usize = self.doc.properties.values().map(|p| p.rt_ids.len()).sum();
        let multi = self
            .doc
            .properties
            .values()
            .filter(|p| p.rt_ids.len() > 1)
            .count();
        self.doc.meta = RegistryMeta {
            built: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            total_properties: total,
            total_transactions_linked: total_rt,
            multi_transaction_properties: multi,
        };

        let content = serde_json::to_string_pretty(&self.doc)?;
        atomic_write(&self.path, content.as_bytes())?;
        log::info!("Registry saved: {total} properties to {}", self.path.display());
        Ok(())
    }

    /// Serializes the properties map without touching disk or meta —
    /// used by idempotence tests to compare two registry states.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Json`] if serialization fails.
    pub fn properties_snapshot(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(&self.doc.properties)?)
    }
}

/// Today's date in the `YYYY-MM-DD` form stored on property records.
#[must_use]
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
