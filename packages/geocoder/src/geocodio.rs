//! Geocodio batch geocoding client for Canadian addresses.
//!
//! Uses the Geocodio v1.9 batch endpoint: one POST carries up to
//! 10,000 addresses as a JSON array. Free-tier friendly — the runner
//! decides how many batches to issue.
//!
//! See <https://www.geocod.io/docs/#batch-geocoding>

use crate::{ForwardGeocoder, GeocodeError, GeocodeFix, ensure_canada, too_imprecise};

/// Maximum addresses per batch request (Geocodio limit).
pub const MAX_BATCH_SIZE: usize = 10_000;

const BATCH_URL: &str = "https://api.geocod.io/v1.9/geocode";

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "GEOCODIO_KEY";

/// Geocodio batch client.
#[derive(Debug, Clone)]
pub struct GeocodioClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeocodioClient {
    /// Builds a client from an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: BATCH_URL.to_string(),
        }
    }

    /// Builds a client from the `GEOCODIO_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::MissingApiKey`] when the variable is
    /// unset or empty — a fatal configuration error.
    pub fn from_env() -> Result<Self, GeocodeError> {
        let key = std::env::var(API_KEY_VAR).unwrap_or_default();
        if key.is_empty() {
            return Err(GeocodeError::MissingApiKey(API_KEY_VAR));
        }
        Ok(Self::new(key))
    }

    /// Points the client at a different endpoint (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl ForwardGeocoder for GeocodioClient {
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    async fn batch_forward(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Option<GeocodeFix>>, GeocodeError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let payload: Vec<String> = addresses.iter().map(|a| ensure_canada(a)).collect();

        let resp = self
            .client
            .post(&self.base_url)
            .query(&[("api_key", self.api_key.as_str()), ("country", "CA")])
            .json(&payload)
            .timeout(std::time::Duration::from_secs(120))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }
        let resp = resp.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;

        Ok(parse_batch_response(&body, addresses.len()))
    }
}

/// Parses the batch response body into one slot per input address.
fn parse_batch_response(body: &serde_json::Value, input_len: usize) -> Vec<Option<GeocodeFix>> {
    let mut results: Vec<Option<GeocodeFix>> = Vec::with_capacity(input_len);

    for item in body["results"].as_array().map_or(&[][..], Vec::as_slice) {
        results.push(parse_item(item));
    }

    // Pad if the response is shorter than the input (should not
    // happen, but a short response must not shift result slots).
    while results.len() < input_len {
        results.push(None);
    }
    results.truncate(input_len);
    results
}

fn parse_item(item: &serde_json::Value) -> Option<GeocodeFix> {
    let best = item["response"]["results"].as_array()?.first()?;
    let location = &best["location"];
    let lat = location["lat"].as_f64()?;
    let lng = location["lng"].as_f64()?;
    let accuracy_type = best["accuracy_type"].as_str();
    if too_imprecise(accuracy_type) {
        return None;
    }
    Some(GeocodeFix {
        lat,
        lng,
        accuracy_type: accuracy_type.map(String::from),
        accuracy: best["accuracy"].as_f64(),
        formatted_address: best["formatted_address"].as_str().map(String::from),
    })
}
