//! GeoWarehouse → registry resolution.
//!
//! Matches ingested GW records to properties by normalized dedup key,
//! with directional fallbacks for streets recorded with or without a
//! trailing cardinal. Matched properties are enriched with the GW
//! snapshot; unmatched records become new GW-sourced properties.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use prop_map_address::{dedup_key, normalize_address_for_dedup, normalize_city_for_dedup};
use prop_map_registry::{PropertyRegistry, RegistryError};
use prop_map_registry_models::{Property, Source};

use crate::GwRecord;

static DIRECTIONS: [&str; 8] = [
    "NORTH", "SOUTH", "EAST", "WEST", "NORTHEAST", "NORTHWEST", "SOUTHEAST", "SOUTHWEST",
];

static TRAILING_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(?:NORTH|SOUTH|EAST|WEST|NORTHEAST|NORTHWEST|SOUTHEAST|SOUTHWEST)$")
        .expect("valid regex")
});

/// One resolved GW record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GwMatch {
    pub gw_id: String,
    pub prop_id: String,
    pub street: String,
    pub city: String,
}

/// One unresolved GW record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GwUnmatched {
    pub gw_id: String,
    pub street: String,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Output of [`match_to_registry`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GwMatchResult {
    pub matched: Vec<GwMatch>,
    pub unmatched: Vec<GwUnmatched>,
}

/// Summary of [`apply_matches`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GwApplySummary {
    pub enriched: usize,
    pub created: usize,
    pub postal_filled: usize,
}

/// Resolves each GW record against the registry's dedup index.
///
/// Exact key first; then the same key with the trailing cardinal
/// stripped; then the key with each of the 8 cardinals appended.
#[must_use]
pub fn match_to_registry(records: &[GwRecord], registry: &PropertyRegistry) -> GwMatchResult {
    let key_to_pid: HashMap<String, String> = registry.dedup_index();
    let mut result = GwMatchResult::default();

    for record in records {
        let parsed = record.parsed_address();
        if parsed.street.is_empty() {
            log::warn!("No street parsed for {}, skipping", record.gw_id);
            result.unmatched.push(GwUnmatched {
                gw_id: record.gw_id.clone(),
                street: parsed.street,
                city: parsed.city,
                reason: Some("no_street".to_string()),
            });
            continue;
        }

        let mut pid = key_to_pid.get(&dedup_key(&parsed.street, &parsed.city));

        if pid.is_none() {
            let norm_addr = normalize_address_for_dedup(&parsed.street);
            let norm_city = normalize_city_for_dedup(&parsed.city);

            let stripped = TRAILING_DIR_RE.replace(&norm_addr, "");
            if stripped != norm_addr {
                pid = key_to_pid.get(&format!("{stripped}|{norm_city}"));
            }
            if pid.is_none() {
                for direction in DIRECTIONS {
                    pid = key_to_pid.get(&format!("{norm_addr} {direction}|{norm_city}"));
                    if pid.is_some() {
                        break;
                    }
                }
            }
        }

        if let Some(pid) = pid {
            result.matched.push(GwMatch {
                gw_id: record.gw_id.clone(),
                prop_id: pid.clone(),
                street: parsed.street,
                city: parsed.city,
            });
        } else {
            result.unmatched.push(GwUnmatched {
                gw_id: record.gw_id.clone(),
                street: parsed.street,
                city: parsed.city,
                reason: None,
            });
        }
    }

    log::info!(
        "GW match: {} matched, {} unmatched of {}",
        result.matched.len(),
        result.unmatched.len(),
        records.len()
    );
    result
}

/// Applies a match result to the registry: enriches matched
/// properties (gw_id, `gw` source, snapshot, postal backfill) and
/// creates new properties for unmatched records.
///
/// # Errors
///
/// Returns [`RegistryError`] if the final save fails; the registry on
/// disk is untouched in that case.
pub fn apply_matches(
    registry: &mut PropertyRegistry,
    records: &[GwRecord],
    result: &GwMatchResult,
    today: &str,
) -> Result<GwApplySummary, RegistryError> {
    let by_gw_id: HashMap<&str, &GwRecord> =
        records.iter().map(|r| (r.gw_id.as_str(), r)).collect();
    let mut summary = GwApplySummary::default();

    for m in &result.matched {
        let Some(record) = by_gw_id.get(m.gw_id.as_str()) else {
            continue;
        };
        let Some(prop) = registry.get_mut(&m.prop_id) else {
            continue;
        };

        if !prop.gw_ids.contains(&m.gw_id) {
            prop.gw_ids.push(m.gw_id.clone());
            prop.gw_ids.sort();
        }
        prop.add_source(Source::Gw);
        prop.sources.sort();
        prop.gw_data = Some(record.to_gw_data());

        let parsed = record.parsed_address();
        if prop.postal_code.is_empty() && !parsed.postal_code.is_empty() {
            prop.postal_code = parsed.postal_code;
            summary.postal_filled += 1;
        }
        prop.updated = today.to_string();
        summary.enriched += 1;
    }

    for u in &result.unmatched {
        if u.street.is_empty() {
            continue;
        }
        let Some(record) = by_gw_id.get(u.gw_id.as_str()) else {
            continue;
        };
        let parsed = record.parsed_address();
        registry.insert_new(Property {
            address: parsed.street,
            city: parsed.city,
            province: parsed.province,
            postal_code: parsed.postal_code,
            lat: None,
            lng: None,
            gw_ids: vec![u.gw_id.clone()],
            gw_data: Some(record.to_gw_data()),
            sources: vec![Source::Gw],
            created: today.to_string(),
            updated: today.to_string(),
            ..Property::default()
        });
        summary.created += 1;
    }

    registry.save()?;
    log::info!(
        "GW apply: {} enriched, {} created, {} postal codes filled",
        summary.enriched,
        summary.created,
        summary.postal_filled
    );
    Ok(summary)
}
