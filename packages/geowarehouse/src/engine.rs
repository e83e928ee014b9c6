//! Batch ingestion of parsed GeoWarehouse records.
//!
//! Input: a directory of parser-output JSON records (one per saved
//! detail page, named after the source capture). Output: deduplicated
//! records written as `GW00001.json`, `GW00002.json`, … with IDs
//! assigned in PIN-sorted order, so the same corpus always produces
//! the same IDs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::{GwError, GwRecord};

/// Summary of an ingestion pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestSummary {
    pub total_files: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub error_files: Vec<String>,
    pub elapsed_secs: f64,
}

/// Extracts the ISO-ish timestamp from a GW capture filename for
/// ordering. Filenames look like
/// `geowarehouse-2025-11-20T17-25-57-019Z.html`.
fn extract_timestamp(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    stem.strip_prefix("geowarehouse-").unwrap_or(stem).to_string()
}

/// Reads every `*.json` record in `records_dir`, deduplicates by PIN
/// (keeping the record whose source filename timestamp sorts last),
/// assigns GW IDs in PIN-sorted order, and writes one file per record
/// into `output_dir`.
///
/// Unreadable or PIN-less records are skipped and counted, never
/// fatal.
///
/// # Errors
///
/// Returns [`GwError`] if the directories cannot be read or output
/// files cannot be written.
pub fn ingest(records_dir: &Path, output_dir: &Path) -> Result<IngestSummary, GwError> {
    let start = Instant::now();

    let mut files: Vec<_> = fs::read_dir(records_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter(|p| p.file_stem().is_none_or(|stem| stem != "_meta"))
        .collect();
    files.sort();

    let mut summary = IngestSummary {
        total_files: files.len(),
        ..IngestSummary::default()
    };

    let mut parsed_records: Vec<(String, String, GwRecord)> = Vec::new();
    for path in &files {
        let record: GwRecord = match fs::read_to_string(path)
            .map_err(GwError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(GwError::from))
        {
            Ok(record) => record,
            Err(err) => {
                log::error!("Error reading {}: {err}", path.display());
                summary.errors += 1;
                summary
                    .error_files
                    .push(path.file_name().and_then(|n| n.to_str()).unwrap_or("?").to_string());
                continue;
            }
        };

        let pin = if record.pin.is_empty() {
            record.registry.pin.clone()
        } else {
            record.pin.clone()
        };
        if pin.is_empty() {
            log::warn!("No PIN found in {}, skipping", path.display());
            summary.skipped += 1;
            continue;
        }

        let source = if record.gw_source_file.is_empty() {
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string()
        } else {
            record.gw_source_file.clone()
        };
        parsed_records.push((pin, source, record));
    }

    // Dedup by PIN, keeping the latest source timestamp.
    let mut best_by_pin: BTreeMap<String, (String, GwRecord)> = BTreeMap::new();
    for (pin, source, record) in parsed_records {
        let ts = extract_timestamp(&source);
        match best_by_pin.get(&pin) {
            Some((existing_ts, _)) if ts <= *existing_ts => {}
            _ => {
                best_by_pin.insert(pin, (ts, record));
            }
        }
    }

    let total_kept = best_by_pin.len();
    summary.duplicates = summary
        .total_files
        .saturating_sub(total_kept + summary.skipped + summary.errors);
    summary.parsed = total_kept;

    // Assign GW IDs in PIN-sorted order (BTreeMap iterates sorted).
    fs::create_dir_all(output_dir)?;
    for (i, (pin, (_, mut record))) in best_by_pin.into_iter().enumerate() {
        let gw_id = format!("GW{:05}", i + 1);
        record.gw_id.clone_from(&gw_id);
        record.pin = pin;
        let out_path = output_dir.join(format!("{gw_id}.json"));
        let content = serde_json::to_string_pretty(&record)?;
        fs::write(out_path, content)?;
    }

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    log::info!(
        "GW ingest: {} kept, {} duplicates, {} skipped, {} errors",
        summary.parsed,
        summary.duplicates,
        summary.skipped,
        summary.errors
    );
    Ok(summary)
}

/// Loads all ingested `GW*.json` records from a directory, sorted by
/// GW ID.
///
/// # Errors
///
/// Returns [`GwError`] if the directory cannot be read; individual
/// unreadable records are skipped with a log line.
pub fn load_records(gw_dir: &Path) -> Result<Vec<GwRecord>, GwError> {
    let mut files: Vec<_> = fs::read_dir(gw_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter(|p| p.file_stem().is_none_or(|stem| stem != "_meta"))
        .collect();
    files.sort();

    let mut records = Vec::new();
    for path in files {
        match fs::read_to_string(&path)
            .map_err(GwError::from)
            .and_then(|raw| serde_json::from_str::<GwRecord>(&raw).map_err(GwError::from))
        {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping {}: {err}", path.display()),
        }
    }
    Ok(records)
}
