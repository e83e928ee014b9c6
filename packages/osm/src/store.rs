//! The tenants document (`tenants.json`): per-property POI lists.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{OsmError, Tenant};

/// Tenants discovered around one property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyTenants {
    pub queried_at: String,
    pub radius_m: u32,
    pub tenants: Vec<Tenant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TenantsMeta {
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    total_properties: usize,
    #[serde(default)]
    total_tenants: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TenantsDoc {
    meta: TenantsMeta,
    properties: BTreeMap<String, PropertyTenants>,
}

/// The tenants.json manager.
#[derive(Debug)]
pub struct TenantStore {
    path: PathBuf,
    doc: TenantsDoc,
}

impl TenantStore {
    /// Opens the store, starting empty if absent.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError`] if the file exists but cannot be read or
    /// parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, OsmError> {
        let path = path.into();
        let doc = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            TenantsDoc::default()
        };
        Ok(Self { path, doc })
    }

    /// Whether a property already has a tenant entry.
    #[must_use]
    pub fn contains(&self, prop_id: &str) -> bool {
        self.doc.properties.contains_key(prop_id)
    }

    /// Number of properties with entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.properties.len()
    }

    /// Whether the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.properties.is_empty()
    }

    /// Tenants recorded for a property.
    #[must_use]
    pub fn get(&self, prop_id: &str) -> Option<&PropertyTenants> {
        self.doc.properties.get(prop_id)
    }

    /// Records the tenants found around a property.
    pub fn set(&mut self, prop_id: &str, radius_m: u32, tenants: Vec<Tenant>) {
        self.doc.properties.insert(
            prop_id.to_string(),
            PropertyTenants {
                queried_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                radius_m,
                tenants,
            },
        );
    }

    /// Writes the store atomically, recomputing meta.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError`] on serialization or write failure.
    pub fn save(&mut self) -> Result<(), OsmError> {
        self.doc.meta = TenantsMeta {
            updated_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            total_properties: self.doc.properties.len(),
            total_tenants: self.doc.properties.values().map(|p| p.tenants.len()).sum(),
        };
        let content = serde_json::to_string_pretty(&self.doc)?;
        prop_map_coords::atomic_write(&self.path, content.as_bytes())?;
        Ok(())
    }
}
