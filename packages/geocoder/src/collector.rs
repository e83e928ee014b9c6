//! Unified address collection across all three source streams.
//!
//! Gathers geocodable addresses from RT extracted records (property
//! addresses at priority 1, buyer/seller at priority 3), parsed
//! GeoWarehouse records (property at 1, owner mailing at 3), and
//! brand store files (priority 2), and registers them in the
//! coordinate store. Compound RT property addresses expand into their
//! individual variants before registration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use prop_map_address::{expand_compound_address, is_po_box, normalize_party_address};
use prop_map_cluster::{AddressRef, Role};
use prop_map_coords::CoordinateStore;
use prop_map_geowarehouse::engine::load_records;
use prop_map_registry_models::BrandStore;

use crate::GeocodeError;

/// One RT record as emitted by the (external) HTML extractor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RtExtract {
    #[serde(default)]
    pub rt_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_province")]
    pub province: String,
    #[serde(default)]
    pub seller_address: String,
    #[serde(default)]
    pub buyer_address: String,
}

fn default_province() -> String {
    "ONTARIO".to_string()
}

/// A collected address with its provenance.
#[derive(Debug, Clone, Default)]
pub struct CollectedAddress {
    /// 1 = property, 2 = brand store, 3 = buyer/seller/owner.
    pub priority: u8,
    /// Source streams that mentioned the address (`rt`, `gw`, `brand`).
    pub sources: Vec<String>,
    /// Roles the address played.
    pub roles: Vec<String>,
    /// RT back-references, consumed by the location clusterer.
    pub rt_refs: Vec<AddressRef>,
}

/// All collected addresses, keyed by normalized address string.
pub type CollectedAddresses = BTreeMap<String, CollectedAddress>;

/// Collection statistics per source.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CollectSummary {
    pub rt_property: usize,
    pub rt_party: usize,
    pub gw_property: usize,
    pub gw_owner: usize,
    pub brand_stores: usize,
    pub po_box_skipped: usize,
    pub total_unique: usize,
}

fn add(
    collected: &mut CollectedAddresses,
    address: &str,
    priority: u8,
    source: &str,
    role: &str,
    rt_ref: Option<AddressRef>,
) {
    let key = address.trim().to_uppercase();
    if key.is_empty() {
        return;
    }
    let entry = collected.entry(key).or_insert_with(|| CollectedAddress {
        priority,
        ..CollectedAddress::default()
    });
    entry.priority = entry.priority.min(priority);
    if !entry.sources.iter().any(|s| s == source) {
        entry.sources.push(source.to_string());
    }
    if !entry.roles.iter().any(|r| r == role) {
        entry.roles.push(role.to_string());
    }
    if let Some(rt_ref) = rt_ref {
        if !entry.rt_refs.contains(&rt_ref) {
            entry.rt_refs.push(rt_ref);
        }
    }
}

/// Collects geocodable addresses from every available source
/// directory. Absent directories are simply skipped.
///
/// # Errors
///
/// Returns [`GeocodeError`] when a present directory cannot be
/// enumerated; individual unreadable files are skipped with a log
/// line.
pub fn collect_all(
    extracted_dir: Option<&Path>,
    gw_dir: Option<&Path>,
    brands_dir: Option<&Path>,
) -> Result<(CollectedAddresses, CollectSummary), GeocodeError> {
    let mut collected = CollectedAddresses::new();
    let mut summary = CollectSummary::default();

    if let Some(dir) = extracted_dir.filter(|d| d.is_dir()) {
        collect_rt(dir, &mut collected, &mut summary)?;
    }
    log::info!(
        "RT: {} property addresses, {} party addresses",
        summary.rt_property,
        summary.rt_party
    );

    if let Some(dir) = gw_dir.filter(|d| d.is_dir()) {
        collect_gw(dir, &mut collected, &mut summary);
    }
    log::info!(
        "GW: {} property addresses, {} owner addresses",
        summary.gw_property,
        summary.gw_owner
    );

    if let Some(dir) = brands_dir.filter(|d| d.is_dir()) {
        collect_brands(dir, &mut collected, &mut summary)?;
    }
    log::info!("Brand: {} store addresses", summary.brand_stores);

    summary.total_unique = collected.len();
    log::info!("Total unique addresses collected: {}", summary.total_unique);
    Ok((collected, summary))
}

fn collect_rt(
    dir: &Path,
    collected: &mut CollectedAddresses,
    summary: &mut CollectSummary,
) -> Result<(), GeocodeError> {
    for path in sorted_json_files(dir)? {
        let record: RtExtract = match fs::read_to_string(&path)
            .map_err(prop_map_coords::CoordsError::from)
            .and_then(|raw| Ok(serde_json::from_str(&raw)?))
        {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Skipping {}: {err}", path.display());
                continue;
            }
        };
        if record.rt_id.is_empty() {
            continue;
        }

        if !record.address.is_empty() {
            if is_po_box(&record.address) {
                summary.po_box_skipped += 1;
            } else {
                for variant in
                    expand_compound_address(&record.address, &record.city, &record.province)
                {
                    add(
                        collected,
                        &variant,
                        1,
                        "rt",
                        "property",
                        Some(AddressRef {
                            rt_id: record.rt_id.clone(),
                            role: Role::Property,
                        }),
                    );
                    summary.rt_property += 1;
                }
            }
        }

        for (party_address, role) in [
            (&record.seller_address, Role::Seller),
            (&record.buyer_address, Role::Buyer),
        ] {
            if party_address.is_empty() || is_po_box(party_address) {
                if is_po_box(party_address) {
                    summary.po_box_skipped += 1;
                }
                continue;
            }
            let normalized = normalize_party_address(party_address, "", "");
            let role_name = match role {
                Role::Seller => "seller",
                Role::Buyer => "buyer",
                Role::Property => "property",
            };
            add(
                collected,
                &normalized,
                3,
                "rt",
                role_name,
                Some(AddressRef {
                    rt_id: record.rt_id.clone(),
                    role,
                }),
            );
            summary.rt_party += 1;
        }
    }
    Ok(())
}

fn collect_gw(dir: &Path, collected: &mut CollectedAddresses, summary: &mut CollectSummary) {
    let records = match load_records(dir) {
        Ok(records) => records,
        Err(err) => {
            log::warn!("Skipping GW records: {err}");
            return;
        }
    };
    for record in records {
        let parsed = record.parsed_address();
        if !parsed.street.is_empty() && !parsed.city.is_empty() {
            let mut parts = vec![parsed.street.clone(), parsed.city.clone(), "ONTARIO".to_string()];
            if !parsed.postal_code.is_empty() {
                parts.push(parsed.postal_code.clone());
            }
            add(collected, &parts.join(", "), 1, "gw", "property", None);
            summary.gw_property += 1;
        }

        // Owner mailing addresses arrive as a complete single line
        // like "12994 KEELE ST SUITE 6 KING CITY ON L7B 1H8".
        let owner = record.site_structure.owner_mailing_address.trim();
        if !owner.is_empty() && !is_po_box(owner) {
            add(collected, owner, 3, "gw", "owner", None);
            summary.gw_owner += 1;
        }
    }
}

fn collect_brands(
    dir: &Path,
    collected: &mut CollectedAddresses,
    summary: &mut CollectSummary,
) -> Result<(), GeocodeError> {
    for path in sorted_json_files(dir)? {
        let stores: Vec<BrandStore> = match fs::read_to_string(&path)
            .map_err(prop_map_coords::CoordsError::from)
            .and_then(|raw| Ok(serde_json::from_str(&raw)?))
        {
            Ok(stores) => stores,
            Err(err) => {
                log::warn!("Skipping {}: {err}", path.display());
                continue;
            }
        };
        for store in stores {
            if store.address.is_empty() || store.city.is_empty() {
                continue;
            }
            add(collected, &store.geocodable_address(), 2, "brand", "store", None);
            summary.brand_stores += 1;
        }
    }
    Ok(())
}

/// Ensures every collected address exists in the coordinate store.
/// Returns the count of newly created keys.
pub fn register_in_store(store: &mut CoordinateStore, collected: &CollectedAddresses) -> usize {
    collected
        .keys()
        .filter(|address| store.register(address))
        .count()
}

fn sorted_json_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, GeocodeError> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .map_err(prop_map_coords::CoordsError::from)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter(|p| p.file_stem().is_none_or(|stem| stem != "_meta"))
        .collect();
    files.sort();
    Ok(files)
}
