//! Mapbox forward geocoding client.
//!
//! Mapbox has no bulk endpoint on the standard plan, so a "batch" is a
//! sequence of single forward-geocode requests with a small delay
//! between them. The runner keeps batches at 50 addresses.
//!
//! See <https://docs.mapbox.com/api/search/geocoding/>

use std::time::Duration;

use crate::{ForwardGeocoder, GeocodeError, GeocodeFix, ensure_canada};

/// Addresses per runner batch.
pub const MAX_BATCH_SIZE: usize = 50;

const BASE_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";

/// Environment variable holding the access token.
pub const API_KEY_VAR: &str = "MAPBOX_TOKEN";

/// Mapbox forward geocoding client.
#[derive(Debug, Clone)]
pub struct MapboxClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
    delay: Duration,
}

impl MapboxClient {
    /// Builds a client from an explicit access token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: BASE_URL.to_string(),
            delay: Duration::from_millis(150),
        }
    }

    /// Builds a client from the `MAPBOX_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::MissingApiKey`] when the variable is
    /// unset or empty.
    pub fn from_env() -> Result<Self, GeocodeError> {
        let token = std::env::var(API_KEY_VAR).unwrap_or_default();
        if token.is_empty() {
            return Err(GeocodeError::MissingApiKey(API_KEY_VAR));
        }
        Ok(Self::new(token))
    }

    /// Points the client at a different endpoint (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn forward_one(&self, address: &str) -> Result<Option<GeocodeFix>, GeocodeError> {
        let query = ensure_canada(address);
        let url = format!(
            "{}/{}.json",
            self.base_url,
            urlencode(&query)
        );
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("access_token", self.token.as_str()),
                ("country", "ca"),
                ("limit", "1"),
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

impl ForwardGeocoder for MapboxClient {
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

/// Parses a Mapbox geocoding response into a fix.
fn parse_response(body: &serde_json::Value) -> Option<GeocodeFix> {
    let feature = body["features"].as_array()?.first()?;
    let center = feature["center"].as_array()?;
    let lng = center.first()?.as_f64()?;
    let lat = center.get(1)?.as_f64()?;
    Some(GeocodeFix {
        lat,
        lng,
        // Mapbox reports accuracy as a string on the feature
        // properties; it maps onto the shared accuracy_type slot.
        accuracy_type: feature["properties"]["accuracy"].as_str().map(String::from),
        accuracy: feature["relevance"].as_f64(),
        formatted_address: feature["place_name"].as_str().map(String::from),
    })
}

/// Minimal percent-encoding for the path segment of a geocode query.
fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '&' => "%26".to_string(),
            '#' => "%23".to_string(),
            '?' => "%3F".to_string(),
            '/' => "%2F".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_feature_center() {
        let body = json!({
            "features": [{
                "center": [-79.3832, 43.6532],
                "place_name": "123 Main Street, Toronto, Ontario, Canada",
                "relevance": 0.98,
                "properties": {"accuracy": "rooftop"}
            }]
        });
        let fix = parse_response(&body).unwrap();
        assert!((fix.lat - 43.6532).abs() < 1e-9);
        assert!((fix.lng - -79.3832).abs() < 1e-9);
        assert_eq!(fix.accuracy_type.as_deref(), Some("rooftop"));
        assert_eq!(
            fix.formatted_address.as_deref(),
            Some("123 Main Street, Toronto, Ontario, Canada")
        );
    }

    #[test]
    fn empty_features_is_none() {
        assert!(parse_response(&json!({"features": []})).is_none());
    }

    #[test]
    fn urlencode_escapes_reserved() {
        assert_eq!(urlencode("1 MAIN ST & 2ND AVE"), "1%20MAIN%20ST%20%26%202ND%20AVE");
    }
}
