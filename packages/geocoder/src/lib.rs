#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Multi-provider forward geocoding for the coordinate store.
//!
//! Providers differ wildly in batch size and request shape, so each
//! client implements one narrow contract:
//! `batch_forward(addresses) → results of matching length`, where a
//! `None` slot means that address could not be geocoded. The
//! [`runner`] walks a provider's pending set from the
//! [`prop_map_coords::CoordinateStore`] in sorted batches, merges
//! results back, and persists periodically.
//!
//! Results with `accuracy_type` of `state` or `county` are treated as
//! misses — they are far too coarse for property matching and usually
//! mean the provider matched "Ontario" itself (often Ontario,
//! California; the clients append ", CANADA" to head that off).

pub mod collector;
pub mod geocodio;
pub mod here;
pub mod mapbox;
pub mod runner;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use prop_map_coords::ProviderFix;

pub use runner::{RunSummary, run_geocode};

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Required API key is absent from the environment. Fail fast; no
    /// partial output.
    #[error("Missing API key: set {0}")]
    MissingApiKey(&'static str),

    /// Coordinate store persistence failed.
    #[error(transparent)]
    Store(#[from] prop_map_coords::CoordsError),
}

/// One successful forward-geocode result.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeFix {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
    /// Provider accuracy class, where available.
    pub accuracy_type: Option<String>,
    /// Provider numeric confidence, where available.
    pub accuracy: Option<f64>,
    /// Canonical address string returned by the provider.
    pub formatted_address: Option<String>,
}

impl GeocodeFix {
    /// Converts into a coordinate-store entry (the runner stamps
    /// `geocoded_at` when merging).
    #[must_use]
    pub fn into_provider_fix(self) -> ProviderFix {
        ProviderFix {
            lat: Some(self.lat),
            lng: Some(self.lng),
            accuracy_type: self.accuracy_type,
            accuracy: self.accuracy,
            formatted_address: self.formatted_address,
            ..ProviderFix::default()
        }
    }
}

/// The forward-geocode provider contract.
///
/// `batch_forward` must return exactly one slot per input address,
/// `None` where the provider had no usable result.
pub trait ForwardGeocoder {
    /// Maximum addresses per batch call.
    fn max_batch_size(&self) -> usize;

    /// Geocodes a batch of addresses.
    fn batch_forward(
        &self,
        addresses: &[String],
    ) -> impl Future<Output = Result<Vec<Option<GeocodeFix>>, GeocodeError>> + Send;
}

/// Cooperative cancellation flag, checked between batches and
/// requests. Cancelling mid-run loses at most one uncommitted batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Appends ", CANADA" to addresses that do not already contain it, so
/// providers do not match Ontario, California.
#[must_use]
pub fn ensure_canada(address: &str) -> String {
    if address.to_uppercase().contains("CANADA") {
        address.to_string()
    } else {
        format!("{address}, CANADA")
    }
}

/// Whether an accuracy class is too imprecise to use.
#[must_use]
pub fn too_imprecise(accuracy_type: Option<&str>) -> bool {
    matches!(accuracy_type, Some("state" | "county"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_canada_appends_once() {
        assert_eq!(ensure_canada("1 MAIN ST, TORONTO, ONTARIO"), "1 MAIN ST, TORONTO, ONTARIO, CANADA");
        assert_eq!(
            ensure_canada("1 MAIN ST, TORONTO, ONTARIO, CANADA"),
            "1 MAIN ST, TORONTO, ONTARIO, CANADA"
        );
    }

    #[test]
    fn state_and_county_are_imprecise() {
        assert!(too_imprecise(Some("state")));
        assert!(too_imprecise(Some("county")));
        assert!(!too_imprecise(Some("rooftop")));
        assert!(!too_imprecise(None));
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
