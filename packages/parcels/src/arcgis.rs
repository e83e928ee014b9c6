//! The ArcGIS REST capability the pipeline consumes: given a point,
//! return intersecting polygon features.
//!
//! The envelope is built in the service's native SRID via the
//! projection package; results always come back in WGS84
//! (`outSR=4326`). Query failures degrade to an empty feature list —
//! a municipality being down must not fail the harvest.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

use prop_map_projection::wgs84_to_service;

/// Seconds between requests to any endpoint.
const DEFAULT_THROTTLE: Duration = Duration::from_millis(500);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Degree buffer per meter at Ontario latitudes, for SRID 4326
/// services where the envelope is in degrees.
const METERS_PER_DEG: f64 = 79_000.0;

/// One feature returned by an ArcGIS query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArcGisFeature {
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub geometry: Option<ArcGisGeometry>,
}

/// ArcGIS polygon geometry (rings of `[x, y]` positions, WGS84).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArcGisGeometry {
    #[serde(default)]
    pub rings: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<ArcGisFeature>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// The point-query capability, implementable over HTTP or canned for
/// tests.
pub trait FeatureQuery {
    /// Features intersecting a small envelope around the point.
    /// Failures surface as an empty list, never an error.
    fn query_point(
        &self,
        service_url: &str,
        lat: f64,
        lng: f64,
        srid: i32,
        out_fields: &str,
        buffer_m: f64,
    ) -> impl Future<Output = Vec<ArcGisFeature>> + Send;
}

/// HTTP implementation over ArcGIS REST `query` endpoints.
#[derive(Debug)]
pub struct ArcGisClient {
    client: reqwest::Client,
    throttle: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Default for ArcGisClient {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}

impl ArcGisClient {
    /// Builds a client with the given inter-request throttle.
    #[must_use]
    pub fn new(throttle: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            throttle,
            last_request: Mutex::new(None),
        }
    }

    async fn wait_throttle(&self) {
        let wait = {
            let mut last = self.last_request.lock().expect("throttle lock");
            let now = Instant::now();
            let wait = last
                .map(|prev| self.throttle.saturating_sub(now.duration_since(prev)))
                .unwrap_or(Duration::ZERO);
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Queries a zoning layer at a point, returning the first
    /// intersecting zone's attributes.
    pub async fn query_zoning_at_point(
        &self,
        zoning_url: &str,
        lat: f64,
        lng: f64,
        srid: i32,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.query_point(zoning_url, lat, lng, srid, "*", 10.0)
            .await
            .into_iter()
            .next()
            .map(|feature| feature.attributes)
    }
}

impl FeatureQuery for ArcGisClient {
    async fn query_point(
        &self,
        service_url: &str,
        lat: f64,
        lng: f64,
        srid: i32,
        out_fields: &str,
        buffer_m: f64,
    ) -> Vec<ArcGisFeature> {
        let Ok((sx, sy)) = wgs84_to_service(lng, lat, srid) else {
            log::warn!("Unsupported SRID {srid} for {service_url}");
            return Vec::new();
        };

        // Buffer in service units: meters for projected systems,
        // degrees for 4326.
        let buffer = if srid == 4326 {
            buffer_m / METERS_PER_DEG
        } else {
            buffer_m
        };
        let envelope = format!(
            "{},{},{},{}",
            sx - buffer,
            sy - buffer,
            sx + buffer,
            sy + buffer
        );

        self.wait_throttle().await;

        let srid_str = srid.to_string();
        let result = self
            .client
            .get(format!("{service_url}/query"))
            .query(&[
                ("geometry", envelope.as_str()),
                ("geometryType", "esriGeometryEnvelope"),
                ("inSR", srid_str.as_str()),
                ("spatialRel", "esriSpatialRelIntersects"),
                ("outFields", out_fields),
                ("returnGeometry", "true"),
                ("outSR", "4326"),
                ("f", "json"),
            ])
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await;

        let response = match result.and_then(reqwest::Response::error_for_status) {
            Ok(resp) => resp,
            Err(err) => {
                log::warn!("ArcGIS query failed for ({lat}, {lng}): {err}");
                return Vec::new();
            }
        };
        match response.json::<QueryResponse>().await {
            Ok(QueryResponse {
                error: Some(error), ..
            }) => {
                log::warn!("ArcGIS error for ({lat}, {lng}): {error}");
                Vec::new()
            }
            Ok(QueryResponse { features, .. }) => features,
            Err(err) => {
                log::warn!("ArcGIS response parse failed for ({lat}, {lng}): {err}");
                Vec::new()
            }
        }
    }
}

/// Converts an ArcGIS polygon to GeoJSON geometry. Returns `None` for
/// ring-less geometry.
#[must_use]
pub fn rings_to_geojson(geometry: &ArcGisGeometry) -> Option<geojson::Geometry> {
    if geometry.rings.is_empty() || geometry.rings.iter().all(Vec::is_empty) {
        return None;
    }
    let rings: Vec<Vec<Vec<f64>>> = geometry
        .rings
        .iter()
        .filter(|ring| !ring.is_empty())
        .map(|ring| ring.iter().map(|pos| vec![pos[0], pos[1]]).collect())
        .collect();
    Some(geojson::Geometry::new(geojson::Value::Polygon(rings)))
}
