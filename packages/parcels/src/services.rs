//! Municipality → ArcGIS endpoint resolution (`services.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ParcelsError;

/// Config for a single municipality's ArcGIS services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,
    pub parcels_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoning_url: Option<String>,
    #[serde(default = "default_srid")]
    pub srid: i32,
    /// Canonical field → service attribute name (e.g. `pin` →
    /// `"PARCEL_PIN"`).
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,
    /// Cities this service covers.
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

const fn default_srid() -> i32 {
    26_917
}

#[derive(Debug, Deserialize)]
struct ServicesDoc {
    services: BTreeMap<String, ServiceConfig>,
}

/// Resolves municipality ArcGIS services from `services.json`.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceConfig>,
    city_lookup: BTreeMap<String, String>,
}

impl ServiceRegistry {
    /// Loads the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ParcelsError::MissingServices`] when the file is
    /// absent — harvesting cannot run without it — or a parse error
    /// when it is malformed.
    pub fn load(path: &Path) -> Result<Self, ParcelsError> {
        if !path.exists() {
            return Err(ParcelsError::MissingServices(path.display().to_string()));
        }
        let doc: ServicesDoc = serde_json::from_str(&fs::read_to_string(path)?)?;

        let mut city_lookup = BTreeMap::new();
        for (key, service) in &doc.services {
            for city in &service.cities {
                city_lookup.insert(city.to_lowercase().trim().to_string(), key.clone());
            }
        }
        log::info!(
            "Loaded {} municipality services covering {} cities",
            doc.services.len(),
            city_lookup.len()
        );
        Ok(Self {
            services: doc.services,
            city_lookup,
        })
    }

    /// Finds the service covering a city.
    ///
    /// Case-insensitive exact match first, then substring matching in
    /// both directions ("City of Owen Sound" ⇄ "Owen Sound").
    #[must_use]
    pub fn resolve(&self, city: &str) -> Option<&ServiceConfig> {
        let norm = city.to_lowercase().trim().to_string();

        if let Some(key) = self.city_lookup.get(&norm) {
            return self.services.get(key);
        }

        for (city_key, service_key) in &self.city_lookup {
            if city_key.contains(&norm) || norm.contains(city_key.as_str()) {
                return self.services.get(service_key);
            }
        }
        None
    }

    /// Looks up a service by municipality key (e.g. `"london"`).
    #[must_use]
    pub fn get(&self, municipality_key: &str) -> Option<&ServiceConfig> {
        self.services.get(municipality_key)
    }

    /// The municipality key a city resolves to, with its config.
    #[must_use]
    pub fn resolve_entry(&self, city: &str) -> Option<(&str, &ServiceConfig)> {
        let norm = city.to_lowercase().trim().to_string();
        let key = self.city_lookup.get(&norm).or_else(|| {
            self.city_lookup
                .iter()
                .find(|(city_key, _)| city_key.contains(&norm) || norm.contains(city_key.as_str()))
                .map(|(_, key)| key)
        })?;
        self.services
            .get(key)
            .map(|service| (key.as_str(), service))
    }

    /// All registered municipality keys.
    #[must_use]
    pub fn municipalities(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}
