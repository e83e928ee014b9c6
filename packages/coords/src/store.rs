//! The on-disk coordinate store and its consensus / reporting queries.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CoordsError, Provider, haversine_m};

/// One provider's result for one address.
///
/// Successful fixes carry `lat`/`lng`; failed attempts carry `failed`
/// with a reason and stay in the store so re-runs skip them unless
/// failures are explicitly cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderFix {
    /// Latitude (WGS84).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    /// Provider accuracy class (e.g. "rooftop", "range_interpolation").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_type: Option<String>,
    /// Provider numeric confidence, where available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Canonical address string returned by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    /// When the fix was obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocoded_at: Option<String>,
    /// For scraper fixes: the brand the coordinates came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// For scraper fixes: when the store page was scraped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<String>,
    /// Set when the provider attempt failed; the entry is kept so the
    /// address is not retried on the next run.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    /// Why the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

impl ProviderFix {
    /// Whether this entry carries usable coordinates.
    #[must_use]
    pub const fn has_coords(&self) -> bool {
        !self.failed && self.lat.is_some() && self.lng.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreMeta {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    providers: Vec<String>,
    #[serde(default)]
    total_addresses: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDoc {
    meta: StoreMeta,
    addresses: BTreeMap<String, BTreeMap<Provider, ProviderFix>>,
}

/// An address whose providers disagree beyond a distance threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Divergence {
    /// The store key.
    pub address: String,
    /// Largest pairwise haversine distance, meters (1 decimal).
    pub max_distance_m: f64,
    /// The two providers realizing the maximum.
    pub worst_pair: (Provider, Provider),
    /// All contributing coordinates.
    pub providers: BTreeMap<Provider, (f64, f64)>,
}

/// Coverage statistics for the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Number of address keys.
    pub total_addresses: usize,
    /// Addresses with a usable fix, per provider.
    pub by_provider: BTreeMap<Provider, usize>,
    /// Addresses with usable fixes from more than one provider.
    pub multi_provider: usize,
}

/// Multi-provider coordinate store backed by a single JSON document.
///
/// All mutation happens in memory; [`CoordinateStore::save`] rewrites
/// the document atomically (temp file, fsync, rename), so readers
/// always see either the previous or the new complete store.
#[derive(Debug)]
pub struct CoordinateStore {
    path: PathBuf,
    doc: StoreDoc,
}

impl CoordinateStore {
    /// Opens the store at `path`, starting empty if the file does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`CoordsError`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoordsError> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreDoc::default()
        };
        log::info!(
            "Coordinate store: {} addresses loaded from {}",
            doc.addresses.len(),
            path.display()
        );
        Ok(Self { path, doc })
    }

    /// Normalizes an address into its store key form.
    #[must_use]
    pub fn normalize_key(address: &str) -> String {
        address.trim().to_uppercase()
    }

    /// Number of address keys in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.addresses.len()
    }

    /// Whether the store holds no addresses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.addresses.is_empty()
    }

    /// All address keys, in sorted order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.doc.addresses.keys().map(String::as_str)
    }

    /// All provider entries for an address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&BTreeMap<Provider, ProviderFix>> {
        self.doc.addresses.get(&Self::normalize_key(address))
    }

    /// Ensures an address key exists (with no provider entries yet).
    /// Returns `true` if the key was newly created.
    pub fn register(&mut self, address: &str) -> bool {
        let key = Self::normalize_key(address);
        if key.is_empty() {
            return false;
        }
        match self.doc.addresses.entry(key) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(BTreeMap::new());
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Sets a single provider's result for an address (idempotent
    /// overwrite).
    pub fn set_provider(&mut self, address: &str, provider: Provider, fix: ProviderFix) {
        self.doc
            .addresses
            .entry(Self::normalize_key(address))
            .or_default()
            .insert(provider, fix);
    }

    /// Records a failed attempt so the address is not retried for this
    /// provider.
    pub fn record_failure(&mut self, address: &str, provider: Provider, reason: &str) {
        self.set_provider(
            address,
            provider,
            ProviderFix {
                failed: true,
                fail_reason: Some(reason.to_string()),
                geocoded_at: Some(now_stamp()),
                ..ProviderFix::default()
            },
        );
    }

    /// Merges a batch of provider results. Entries are stamped with the
    /// current time; `None` results are recorded as failures. Returns
    /// the number of successful fixes added.
    pub fn add_batch(
        &mut self,
        provider: Provider,
        addresses: &[String],
        results: &[Option<ProviderFix>],
    ) -> usize {
        let now = now_stamp();
        let mut added = 0;
        for (address, result) in addresses.iter().zip(results.iter()) {
            match result {
                Some(fix) => {
                    let mut fix = fix.clone();
                    fix.geocoded_at = Some(now.clone());
                    self.set_provider(address, provider, fix);
                    added += 1;
                }
                None => self.record_failure(address, provider, "no_results"),
            }
        }
        added
    }

    /// Best available coordinates for an address.
    ///
    /// A single provider wins outright. With several providers, the
    /// per-axis median of the non-scraper fixes is used: lats and lngs
    /// are sorted independently and the middle element of each is
    /// taken. This is robust to one outlier without needing a 2D
    /// medoid. If only scraper fixes exist, the scraper wins.
    #[must_use]
    pub fn best_coords(&self, address: &str) -> Option<(f64, f64)> {
        let entry = self.get(address)?;

        let coords: Vec<(f64, f64, Provider)> = Provider::ALL
            .iter()
            .filter_map(|p| {
                let fix = entry.get(p)?;
                if fix.has_coords() {
                    Some((fix.lat?, fix.lng?, *p))
                } else {
                    None
                }
            })
            .collect();

        match coords.as_slice() {
            [] => None,
            [(lat, lng, _)] => Some((*lat, *lng)),
            _ => {
                let non_scraper: Vec<(f64, f64)> = coords
                    .iter()
                    .filter(|(_, _, p)| *p != Provider::Scraper)
                    .map(|(lat, lng, _)| (*lat, *lng))
                    .collect();
                if non_scraper.is_empty() {
                    return Some((coords[0].0, coords[0].1));
                }
                let mut lats: Vec<f64> = non_scraper.iter().map(|c| c.0).collect();
                let mut lngs: Vec<f64> = non_scraper.iter().map(|c| c.1).collect();
                lats.sort_by(|a, b| a.partial_cmp(b).expect("finite latitude"));
                lngs.sort_by(|a, b| a.partial_cmp(b).expect("finite longitude"));
                // Lower middle on even counts, so two providers resolve
                // deterministically instead of always favoring the
                // larger coordinate.
                let mid = (lats.len() - 1) / 2;
                Some((lats[mid], lngs[mid]))
            }
        }
    }

    /// Addresses lacking any entry (success or recorded failure) for
    /// the given provider, in sorted order.
    #[must_use]
    pub fn pending(&self, provider: Provider) -> Vec<String> {
        self.doc
            .addresses
            .iter()
            .filter(|(_, entry)| !entry.contains_key(&provider))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Removes recorded failures for a provider so they will be
    /// retried. Returns the count removed.
    pub fn clear_failures(&mut self, provider: Provider) -> usize {
        let mut removed = 0;
        for entry in self.doc.addresses.values_mut() {
            if entry.get(&provider).is_some_and(|fix| fix.failed) {
                entry.remove(&provider);
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Cleared {removed} failed {provider} entries");
        }
        removed
    }

    /// Addresses where providers disagree by at least `threshold_m`
    /// meters, sorted by descending maximum pairwise distance.
    #[must_use]
    pub fn divergence_report(&self, threshold_m: f64) -> Vec<Divergence> {
        let mut divergences: Vec<Divergence> = Vec::new();

        for (key, entry) in &self.doc.addresses {
            let coords: BTreeMap<Provider, (f64, f64)> = entry
                .iter()
                .filter(|(_, fix)| fix.has_coords())
                .filter_map(|(p, fix)| Some((*p, (fix.lat?, fix.lng?))))
                .collect();
            if coords.len() < 2 {
                continue;
            }

            let providers: Vec<Provider> = coords.keys().copied().collect();
            let mut max_dist = 0.0_f64;
            let mut worst_pair = (providers[0], providers[0]);
            for i in 0..providers.len() {
                for j in (i + 1)..providers.len() {
                    let (a, b) = (coords[&providers[i]], coords[&providers[j]]);
                    let d = haversine_m(a.0, a.1, b.0, b.1);
                    if d > max_dist {
                        max_dist = d;
                        worst_pair = (providers[i], providers[j]);
                    }
                }
            }

            if max_dist >= threshold_m {
                divergences.push(Divergence {
                    address: key.clone(),
                    max_distance_m: (max_dist * 10.0).round() / 10.0,
                    worst_pair,
                    providers: coords,
                });
            }
        }

        divergences.sort_by(|a, b| {
            b.max_distance_m
                .partial_cmp(&a.max_distance_m)
                .expect("finite distances")
                .then_with(|| a.address.cmp(&b.address))
        });
        divergences
    }

    /// Coverage statistics by provider.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut by_provider: BTreeMap<Provider, usize> = BTreeMap::new();
        let mut multi_provider = 0;
        for entry in self.doc.addresses.values() {
            let usable = entry.iter().filter(|(_, fix)| fix.has_coords()).count();
            for (provider, fix) in entry {
                if fix.has_coords() {
                    *by_provider.entry(*provider).or_default() += 1;
                }
            }
            if usable > 1 {
                multi_provider += 1;
            }
        }
        StoreStats {
            total_addresses: self.doc.addresses.len(),
            by_provider,
            multi_provider,
        }
    }

    /// Imports scraper coordinates for an address unless a scraper fix
    /// already exists. Returns `true` if imported.
    pub fn seed_scraper(
        &mut self,
        address: &str,
        lat: f64,
        lng: f64,
        brand: &str,
        scraped_at: &str,
    ) -> bool {
        let key = Self::normalize_key(address);
        if key.is_empty() {
            return false;
        }
        let entry = self.doc.addresses.entry(key).or_default();
        if entry.contains_key(&Provider::Scraper) {
            return false;
        }
        entry.insert(
            Provider::Scraper,
            ProviderFix {
                lat: Some(lat),
                lng: Some(lng),
                source: Some(brand.to_string()),
                scraped_at: Some(scraped_at.to_string()),
                ..ProviderFix::default()
            },
        );
        true
    }

    /// Writes the store to disk atomically.
    ///
    /// The document is serialized to a temp sibling, fsynced, and
    /// renamed over the target. On any error the temp file is removed
    /// and the previous store file is left intact.
    ///
    /// # Errors
    ///
    /// Returns [`CoordsError`] if serialization or any file operation
    /// fails.
    pub fn save(&mut self) -> Result<(), CoordsError> {
        let mut providers: Vec<String> = self
            .doc
            .addresses
            .values()
            .flat_map(|entry| entry.keys().map(ToString::to_string))
            .collect();
        providers.sort();
        providers.dedup();

        self.doc.meta = StoreMeta {
            version: 1,
            updated_at: now_stamp(),
            providers,
            total_addresses: self.doc.addresses.len(),
        };

        let content = serde_json::to_string_pretty(&self.doc)?;
        atomic_write(&self.path, content.as_bytes())?;
        log::info!(
            "Saved coordinate store: {} addresses to {}",
            self.doc.addresses.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Writes `content` to `path` via a temp sibling + fsync + rename.
///
/// On error the temp file is unlinked and the existing target file is
/// left untouched. Shared by every JSON document in the pipeline.
///
/// # Errors
///
/// Returns the underlying I/O error when any step fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() && tmp.exists() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
