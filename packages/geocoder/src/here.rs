//! HERE forward geocoding client.
//!
//! Single-request geocoding with a delay between requests, batched at
//! 50 by the runner like Mapbox.
//!
//! See <https://www.here.com/docs/bundle/geocoding-and-search-api-developer-guide/page/topics/endpoint-geocode-brief.html>

use std::time::Duration;

use crate::{ForwardGeocoder, GeocodeError, GeocodeFix, ensure_canada};

/// Addresses per runner batch.
pub const MAX_BATCH_SIZE: usize = 50;

const BASE_URL: &str = "https://geocode.search.hereapi.com/v1/geocode";

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "HERE_API_KEY";

/// HERE forward geocoding client.
#[derive(Debug, Clone)]
pub struct HereClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    delay: Duration,
}

impl HereClient {
    /// Builds a client from an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            delay: Duration::from_millis(150),
        }
    }

    /// Builds a client from the `HERE_API_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::MissingApiKey`] when the variable is
    /// unset or empty.
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

    async fn forward_one(&self, address: &str) -> Result<Option<GeocodeFix>, GeocodeError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", ensure_canada(address).as_str()),
                ("in", "countryCode:CAN"),
                ("apiKey", self.api_key.as_str()),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }
        let resp = resp.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        Ok(parse_response(&body))
    }
}

impl ForwardGeocoder for HereClient {
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    async fn batch_forward(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Option<GeocodeFix>>, GeocodeError> {
        let mut results = Vec::with_capacity(addresses.len());
        for (i, address) in addresses.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            results.push(self.forward_one(address).await?);
        }
        Ok(results)
    }
}

/// Parses a HERE geocode response into a fix.
fn parse_response(body: &serde_json::Value) -> Option<GeocodeFix> {
    let item = body["items"].as_array()?.first()?;
    let position = &item["position"];
    let lat = position["lat"].as_f64()?;
    let lng = position["lng"].as_f64()?;
    Some(GeocodeFix {
        lat,
        lng,
        accuracy_type: item["resultType"].as_str().map(String::from),
        accuracy: item["scoring"]["queryScore"].as_f64(),
        formatted_address: item["address"]["label"].as_str().map(String::from),
    })
}
