//! The geocoding orchestrator.
//!
//! Walks a provider's pending addresses in sorted order in
//! provider-sized batches, merges each batch into the coordinate
//! store, and persists every 10 batches and at the end. A failed
//! batch marks every address in it as failed for that provider and
//! the run continues; cancellation between batches loses at most the
//! current batch.

use std::time::Instant;

use prop_map_coords::{CoordinateStore, Provider};

use crate::{CancelToken, ForwardGeocoder, GeocodeError};

/// Batches between periodic saves.
const SAVE_EVERY_BATCHES: usize = 10;

/// Summary of a geocoding run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunSummary {
    pub provider: String,
    pub total_in_store: usize,
    pub pending: usize,
    pub geocoded: usize,
    pub successes: usize,
    pub failures: usize,
    pub batch_requests: usize,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

/// Runs the orchestrator for one provider.
///
/// `limit` caps the number of addresses attempted; `dry_run` reports
/// the pending count without calling the API.
///
/// # Errors
///
/// Returns [`GeocodeError`] only for store persistence failures.
/// Batch-level API failures are recorded per address and never abort
/// the run.
pub async fn run_geocode<G: ForwardGeocoder>(
    store: &mut CoordinateStore,
    provider: Provider,
    client: &G,
    limit: Option<usize>,
    dry_run: bool,
    cancel: &CancelToken,
) -> Result<RunSummary, GeocodeError> {
    let start = Instant::now();

    let mut pending = store.pending(provider);
    if let Some(limit) = limit {
        pending.truncate(limit);
    }

    let mut summary = RunSummary {
        provider: provider.to_string(),
        total_in_store: store.len(),
        pending: pending.len(),
        ..RunSummary::default()
    };

    if dry_run || pending.is_empty() {
        if pending.is_empty() {
            log::info!("No pending addresses for {provider}.");
        }
        summary.elapsed_secs = start.elapsed().as_secs_f64();
        return Ok(summary);
    }

    let batch_size = client.max_batch_size().max(1);

    for batch in pending.chunks(batch_size) {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        match client.batch_forward(batch).await {
            Ok(results) => {
                summary.batch_requests += 1;
                let fixes: Vec<_> = results
                    .into_iter()
                    .map(|r| r.map(crate::GeocodeFix::into_provider_fix))
                    .collect();
                let added = store.add_batch(provider, batch, &fixes);
                summary.geocoded += batch.len();
                summary.successes += added;
                summary.failures += batch.len() - added;
            }
            Err(err) => {
                log::error!(
                    "Batch request failed at offset {}: {err}",
                    summary.geocoded
                );
                summary.batch_requests += 1;
                let reason = err.to_string();
                for address in batch {
                    store.record_failure(address, provider, &reason);
                }
                summary.geocoded += batch.len();
                summary.failures += batch.len();
            }
        }

        if summary.batch_requests % SAVE_EVERY_BATCHES == 0 {
            store.save()?;
            log::info!(
                "Progress: {} / {} geocoded ({} successes, {} failures)",
                summary.geocoded,
                pending.len(),
                summary.successes,
                summary.failures
            );
        }
    }

    store.save()?;
    summary.elapsed_secs = start.elapsed().as_secs_f64();
    log::info!(
        "Done: {} geocoded ({} successes, {} failures) in {:.1}s via {} batch requests [{provider}]",
        summary.geocoded,
        summary.successes,
        summary.failures,
        summary.elapsed_secs,
        summary.batch_requests
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeocodeFix;
    use std::sync::Mutex;

    /// Scripted geocoder: pops one canned batch result per call.
    struct ScriptedGeocoder {
        batch_size: usize,
        script: Mutex<Vec<Result<Vec<Option<GeocodeFix>>, GeocodeError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedGeocoder {
        fn new(batch_size: usize) -> Self {
            Self {
                batch_size,
                script: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push(self, result: Result<Vec<Option<GeocodeFix>>, GeocodeError>) -> Self {
            self.script.lock().unwrap().push(result);
            self
        }
    }

    impl ForwardGeocoder for ScriptedGeocoder {
        fn max_batch_size(&self) -> usize {
            self.batch_size
        }

        async fn batch_forward(
            &self,
            addresses: &[String],
        ) -> Result<Vec<Option<GeocodeFix>>, GeocodeError> {
            self.calls.lock().unwrap().push(addresses.to_vec());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(vec![None; addresses.len()])
            } else {
                script.remove(0)
            }
        }
    }

    fn fix(lat: f64, lng: f64) -> GeocodeFix {
        GeocodeFix {
            lat,
            lng,
            accuracy_type: Some("rooftop".to_string()),
            accuracy: Some(1.0),
            formatted_address: None,
        }
    }

    fn store(name: &str) -> CoordinateStore {
        let path = std::env::temp_dir().join(format!(
            "runner-{name}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        CoordinateStore::open(path).unwrap()
    }

    #[tokio::test]
    async fn walks_pending_in_sorted_batches() {
        let mut s = store("sorted");
        s.register("B ADDR");
        s.register("A ADDR");
        s.register("C ADDR");

        let client = ScriptedGeocoder::new(2)
            .push(Ok(vec![Some(fix(43.0, -79.0)), None]))
            .push(Ok(vec![Some(fix(44.0, -80.0))]));

        let summary = run_geocode(
            &mut s,
            Provider::Geocodio,
            &client,
            None,
            false,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.batch_requests, 2);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["A ADDR", "B ADDR"]);
        assert_eq!(calls[1], vec!["C ADDR"]);

        // Successes carry coordinates, misses are recorded failures.
        assert_eq!(s.best_coords("A ADDR"), Some((43.0, -79.0)));
        assert!(s.get("B ADDR").unwrap()[&Provider::Geocodio].failed);
        assert!(s.pending(Provider::Geocodio).is_empty());
    }

    #[tokio::test]
    async fn batch_error_marks_whole_batch_failed_and_continues() {
        let mut s = store("batcherr");
        s.register("A ADDR");
        s.register("B ADDR");
        s.register("C ADDR");

        let client = ScriptedGeocoder::new(2)
            .push(Err(GeocodeError::Parse {
                message: "boom".to_string(),
            }))
            .push(Ok(vec![Some(fix(44.0, -80.0))]));

        let summary = run_geocode(
            &mut s,
            Provider::Mapbox,
            &client,
            None,
            false,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.failures, 2);
        assert_eq!(summary.successes, 1);
        assert!(s.get("A ADDR").unwrap()[&Provider::Mapbox].failed);
        assert_eq!(s.best_coords("C ADDR"), Some((44.0, -80.0)));
    }

    #[tokio::test]
    async fn dry_run_reports_without_calling() {
        let mut s = store("dryrun");
        s.register("A ADDR");
        let client = ScriptedGeocoder::new(10);
        let summary = run_geocode(
            &mut s,
            Provider::Here,
            &client,
            None,
            true,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.batch_requests, 0);
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_between_batches() {
        let mut s = store("cancel");
        s.register("A ADDR");
        s.register("B ADDR");

        let cancel = CancelToken::new();
        cancel.cancel();
        let client = ScriptedGeocoder::new(1);
        let summary = run_geocode(&mut s, Provider::Geocodio, &client, None, false, &cancel)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.batch_requests, 0);
        // Pending work is untouched and persisted for the next run.
        assert_eq!(s.pending(Provider::Geocodio).len(), 2);
    }

    #[tokio::test]
    async fn limit_caps_attempted_addresses() {
        let mut s = store("limit");
        s.register("A ADDR");
        s.register("B ADDR");
        s.register("C ADDR");
        let client = ScriptedGeocoder::new(10).push(Ok(vec![Some(fix(43.0, -79.0))]));
        let summary = run_geocode(
            &mut s,
            Provider::Geocodio,
            &client,
            Some(1),
            false,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(client.calls.lock().unwrap()[0], vec!["A ADDR"]);
        assert_eq!(summary.successes, 1);
    }
}
