//! Tenant discovery pass over the registry.
//!
//! Walks properties with coordinates that have no tenant entry yet,
//! queries the Overpass client around each, and persists periodically.
//! Cancellable between requests; partial results are saved.

use prop_map_geocoder::CancelToken;
use prop_map_registry::PropertyRegistry;

use crate::store::TenantStore;
use crate::{OsmError, OverpassClient};

/// Properties between periodic saves.
const SAVE_EVERY: usize = 10;

/// Summary of a tenant discovery pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TenantsSummary {
    pub queried: usize,
    pub tenants_found: usize,
    pub already_done: usize,
    pub no_coords: usize,
    pub failures: usize,
    pub cancelled: bool,
}

/// Discovers tenants around every unqueried property.
///
/// Per-property query failures are counted and the walk continues;
/// only store persistence failures abort.
///
/// # Errors
///
/// Returns [`OsmError`] if the tenant store cannot be saved.
pub async fn discover_tenants(
    registry: &PropertyRegistry,
    store: &mut TenantStore,
    client: &mut OverpassClient,
    radius_m: u32,
    limit: Option<usize>,
    cancel: &CancelToken,
) -> Result<TenantsSummary, OsmError> {
    let mut summary = TenantsSummary::default();

    for (pid, prop) in registry.iter() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        if limit.is_some_and(|l| summary.queried >= l) {
            break;
        }
        if store.contains(pid) {
            summary.already_done += 1;
            continue;
        }
        let (Some(lat), Some(lng)) = (prop.lat, prop.lng) else {
            summary.no_coords += 1;
            continue;
        };

        match client.query_tenants(lat, lng, radius_m).await {
            Ok(tenants) => {
                summary.tenants_found += tenants.len();
                store.set(pid, radius_m, tenants);
            }
            Err(err) => {
                log::warn!("Tenant query failed for {pid}: {err}");
                summary.failures += 1;
            }
        }
        summary.queried += 1;

        if summary.queried % SAVE_EVERY == 0 {
            store.save()?;
            log::info!(
                "Tenants: {} queried, {} found so far",
                summary.queried,
                summary.tenants_found
            );
        }
    }

    store.save()?;
    log::info!(
        "Tenant discovery: {} queried, {} tenants, {} failures{}",
        summary.queried,
        summary.tenants_found,
        summary.failures,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(summary)
}
