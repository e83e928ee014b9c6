//! The Overpass client: endpoint rotation, rate limiting, retries.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::{OsmError, Tenant};

/// Public Overpass endpoints, tried round-robin.
pub const OVERPASS_URLS: [&str; 3] = [
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
    "https://maps.mail.ru/osm/tools/overpass/api/interpreter",
];

/// Minimum delay between requests, seconds.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

const MAX_RETRIES: usize = 3;

/// OSM tag keys that indicate commercial/retail POIs.
const COMMERCIAL_KEYS: [&str; 7] = [
    "shop",
    "amenity",
    "office",
    "leisure",
    "tourism",
    "healthcare",
    "craft",
];

/// Queries the Overpass API for commercial POIs near coordinates,
/// with automatic failover across the public endpoints.
#[derive(Debug)]
pub struct OverpassClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    server_idx: usize,
    last_request: Option<Instant>,
    delay: Duration,
}

impl Default for OverpassClient {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

impl OverpassClient {
    /// Builds a client over the default endpoint set.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self::with_endpoints(
            OVERPASS_URLS.iter().map(ToString::to_string).collect(),
            delay,
        )
    }

    /// Builds a client over an explicit endpoint set (tests, private
    /// instances).
    #[must_use]
    pub fn with_endpoints(endpoints: Vec<String>, delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            server_idx: 0,
            last_request: None,
            delay,
        }
    }

    fn current_endpoint(&self) -> &str {
        &self.endpoints[self.server_idx % self.endpoints.len()]
    }

    fn rotate_server(&mut self) {
        self.server_idx += 1;
        log::info!("Rotating to Overpass server: {}", self.current_endpoint());
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
    }

    /// Finds all named commercial POIs within `radius` meters of the
    /// coordinates, deduplicated by OSM id.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError::AllServersFailed`] when every attempt hit a
    /// rate limit or connection failure, or [`OsmError::Http`] for a
    /// non-retryable HTTP error.
    pub async fn query_tenants(
        &mut self,
        lat: f64,
        lng: f64,
        radius: u32,
    ) -> Result<Vec<Tenant>, OsmError> {
        self.rate_limit().await;
        let query = build_query(lat, lng, radius);

        let mut data = None;
        for _attempt in 0..MAX_RETRIES {
            let url = self.current_endpoint().to_string();
            let result = self
                .client
                .post(&url)
                .form(&[("data", query.as_str())])
                .timeout(Duration::from_secs(25))
                .send()
                .await;
            self.last_request = Some(Instant::now());

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    // Rate limiting rotates rather than consuming the
                    // retry budget of a healthy server.
                    log::warn!("Rate limited by {url}, rotating server...");
                    self.rotate_server();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => {
                        data = Some(resp.json::<serde_json::Value>().await?);
                        break;
                    }
                    Err(err) => {
                        log::error!("Overpass query failed ({url}): {err}");
                        return Err(err.into());
                    }
                },
                Err(err) if err.is_connect() || err.is_timeout() => {
                    log::warn!("Connection issue with {url}: {err}, rotating...");
                    self.rotate_server();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(err) => {
                    log::error!("Overpass query failed: {err}");
                    return Err(err.into());
                }
            }
        }

        let Some(data) = data else {
            return Err(OsmError::AllServersFailed(MAX_RETRIES));
        };

        let mut tenants = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for element in data["elements"].as_array().map_or(&[][..], Vec::as_slice) {
            if let Some(tenant) = parse_element(element) {
                if seen.insert(tenant.osm_id.clone()) {
                    tenants.push(tenant);
                }
            }
        }
        Ok(tenants)
    }
}

/// Builds an Overpass QL query for commercial POIs near coordinates.
fn build_query(lat: f64, lng: f64, radius: u32) -> String {
    let mut filters = String::new();
    for key in COMMERCIAL_KEYS {
        filters.push_str(&format!(
            "  node[\"{key}\"](around:{radius},{lat},{lng});\n  way[\"{key}\"](around:{radius},{lat},{lng});\n"
        ));
    }
    format!("[out:json][timeout:25];\n(\n{filters});\nout center tags;\n")
}

/// Parses one Overpass element into a tenant. Unnamed elements are
/// dropped.
fn parse_element(element: &serde_json::Value) -> Option<Tenant> {
    let tags = element.get("tags")?;
    let name = tags["name"].as_str()?;

    // Nodes carry lat/lon directly; ways carry a computed center.
    let (lat, lng) = if element["type"].as_str() == Some("node") {
        (element["lat"].as_f64()?, element["lon"].as_f64()?)
    } else {
        (
            element["center"]["lat"].as_f64()?,
            element["center"]["lon"].as_f64()?,
        )
    };

    let category = COMMERCIAL_KEYS.iter().find_map(|key| {
        tags[*key]
            .as_str()
            .map(|value| format!("{key}={value}"))
    });

    let tag_string = |key: &str| tags[key].as_str().map(String::from);

    Some(Tenant {
        osm_id: format!(
            "{}/{}",
            element["type"].as_str().unwrap_or("node"),
            element["id"]
        ),
        name: name.to_string(),
        brand: tag_string("brand"),
        brand_wikidata: tag_string("brand:wikidata"),
        category,
        lat,
        lng,
        address: tag_string("addr:street"),
        housenumber: tag_string("addr:housenumber"),
        phone: tag_string("phone"),
        website: tag_string("website"),
        opening_hours: tag_string("opening_hours"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_covers_all_commercial_keys() {
        let query = build_query(43.65, -79.38, 150);
        assert!(query.starts_with("[out:json][timeout:25];"));
        for key in COMMERCIAL_KEYS {
            assert!(query.contains(&format!("node[\"{key}\"](around:150,43.65,-79.38)")));
            assert!(query.contains(&format!("way[\"{key}\"](around:150,43.65,-79.38)")));
        }
        assert!(query.ends_with("out center tags;\n"));
    }

    #[test]
    fn parses_node_element() {
        let element = json!({
            "type": "node",
            "id": 123,
            "lat": 43.65,
            "lon": -79.38,
            "tags": {
                "name": "Joe's Diner",
                "amenity": "restaurant",
                "phone": "+1-905-555-0100"
            }
        });
        let tenant = parse_element(&element).unwrap();
        assert_eq!(tenant.osm_id, "node/123");
        assert_eq!(tenant.name, "Joe's Diner");
        assert_eq!(tenant.category.as_deref(), Some("amenity=restaurant"));
        assert!((tenant.lat - 43.65).abs() < 1e-9);
    }

    #[test]
    fn parses_way_element_with_center() {
        let element = json!({
            "type": "way",
            "id": 456,
            "center": {"lat": 43.66, "lon": -79.39},
            "tags": {"name": "Corner Plaza", "shop": "mall"}
        });
        let tenant = parse_element(&element).unwrap();
        assert_eq!(tenant.osm_id, "way/456");
        assert_eq!(tenant.category.as_deref(), Some("shop=mall"));
        assert!((tenant.lng - -79.39).abs() < 1e-9);
    }

    #[test]
    fn unnamed_elements_are_dropped() {
        let element = json!({
            "type": "node",
            "id": 789,
            "lat": 43.0,
            "lon": -79.0,
            "tags": {"shop": "convenience"}
        });
        assert!(parse_element(&element).is_none());
    }

    #[test]
    fn category_prefers_shop_over_later_keys() {
        let element = json!({
            "type": "node",
            "id": 1,
            "lat": 43.0,
            "lon": -79.0,
            "tags": {"name": "X", "shop": "bakery", "amenity": "cafe"}
        });
        let tenant = parse_element(&element).unwrap();
        assert_eq!(tenant.category.as_deref(), Some("shop=bakery"));
    }
}
