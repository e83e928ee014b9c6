#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]
#![allow(clippy::many_single_char_names, clippy::similar_names)]

//! Coordinate projection between WGS84 and the two systems Ontario
//! municipal ArcGIS services publish in: Web Mercator (EPSG:3857 /
//! 102100) and NAD83 / UTM zone 17N (EPSG:26917).
//!
//! Closed-form transforms only — no proj dependency. The UTM transform
//! uses the standard transverse Mercator series on the WGS84 ellipsoid
//! with the zone-17 central meridian at −81°, accurate to under a
//! meter across Ontario. EPSG:2958 (NAD83 CSRS) is accepted as 26917;
//! the datum difference is below 2 m, negligible for bbox queries.

use thiserror::Error;

/// Errors from SRID dispatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    /// The SRID is not one of 4326, 3857/102100, 26917/2958.
    #[error("Unsupported SRID: {0}")]
    UnsupportedSrid(i32),
}

const WEB_MERCATOR_BOUND: f64 = 20_037_508.34;

// WGS84 ellipsoid.
const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
// UTM zone 17N.
const K0: f64 = 0.9996;
const LON0_DEG: f64 = -81.0;
const FALSE_EASTING: f64 = 500_000.0;

/// Converts WGS84 (lng, lat) to Web Mercator (x, y), EPSG:3857.
#[must_use]
pub fn wgs84_to_web_mercator(lng: f64, lat: f64) -> (f64, f64) {
    let x = lng * WEB_MERCATOR_BOUND / 180.0;
    let y = ((90.0 + lat) * std::f64::consts::PI / 360.0).tan().ln()
        / (std::f64::consts::PI / 180.0);
    (x, y * WEB_MERCATOR_BOUND / 180.0)
}

/// Converts Web Mercator (x, y), EPSG:3857, to WGS84 (lng, lat).
#[must_use]
pub fn web_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lng = x * 180.0 / WEB_MERCATOR_BOUND;
    let lat = y * 180.0 / WEB_MERCATOR_BOUND;
    let lat = 180.0 / std::f64::consts::PI
        * (2.0 * (lat * std::f64::consts::PI / 180.0).exp().atan() - std::f64::consts::PI / 2.0);
    (lng, lat)
}

/// Converts WGS84 (lng, lat) to NAD83 / UTM zone 17N (easting,
/// northing), EPSG:26917.
#[must_use]
pub fn wgs84_to_utm17n(lng: f64, lat: f64) -> (f64, f64) {
    let e2 = 2.0 * F - F * F;
    let e_prime2 = e2 / (1.0 - e2);

    let phi = lat.to_radians();
    let lam = lng.to_radians();
    let dlam = lam - LON0_DEG.to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = e_prime2 * cos_phi * cos_phi;
    let a_term = cos_phi * dlam;

    let m = meridional_arc(phi, e2);

    let x = K0
        * n
        * (a_term
            + (1.0 - t + c) * a_term.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * e_prime2) * a_term.powi(5) / 120.0)
        + FALSE_EASTING;

    let y = K0
        * (m + n
            * tan_phi
            * (a_term.powi(2) / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a_term.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * e_prime2) * a_term.powi(6)
                    / 720.0));

    (x, y)
}

/// Converts NAD83 / UTM zone 17N (easting, northing), EPSG:26917, to
/// WGS84 (lng, lat).
#[must_use]
pub fn utm17n_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let e2 = 2.0 * F - F * F;
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let e_prime2 = e2 / (1.0 - e2);

    let x = x - FALSE_EASTING;
    let m = y / K0;
    let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();
    let n1 = A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let t1 = tan_phi1 * tan_phi1;
    let c1 = e_prime2 * cos_phi1 * cos_phi1;
    let r1 = A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * e_prime2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * e_prime2
                    - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lng = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * e_prime2 + 24.0 * t1 * t1)
            * d.powi(5)
            / 120.0)
        / cos_phi1;

    (LON0_DEG + lng.to_degrees(), lat.to_degrees())
}

fn meridional_arc(phi: f64, e2: f64) -> f64 {
    A * ((1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e2 * e2 / 32.0 + 45.0 * e2.powi(3) / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e2 * e2 / 256.0 + 45.0 * e2.powi(3) / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e2.powi(3) / 3072.0) * (6.0 * phi).sin())
}

/// Projects a WGS84 point to a service's native coordinate system.
///
/// # Errors
///
/// Returns [`ProjectionError::UnsupportedSrid`] for SRIDs other than
/// 4326, 3857/102100, and 26917/2958.
pub fn wgs84_to_service(lng: f64, lat: f64, srid: i32) -> Result<(f64, f64), ProjectionError> {
    match srid {
        4326 => Ok((lng, lat)),
        3857 | 102_100 => Ok(wgs84_to_web_mercator(lng, lat)),
        // 2958 is NAD83(CSRS); the difference from 26917 is < 2 m.
        26_917 | 2958 => Ok(wgs84_to_utm17n(lng, lat)),
        other => Err(ProjectionError::UnsupportedSrid(other)),
    }
}

/// Unprojects service coordinates back to WGS84 (lng, lat).
///
/// # Errors
///
/// Returns [`ProjectionError::UnsupportedSrid`] for SRIDs other than
/// 4326, 3857/102100, and 26917/2958.
pub fn service_to_wgs84(x: f64, y: f64, srid: i32) -> Result<(f64, f64), ProjectionError> {
    match srid {
        4326 => Ok((x, y)),
        3857 | 102_100 => Ok(web_mercator_to_wgs84(x, y)),
        26_917 | 2958 => Ok(utm17n_to_wgs84(x, y)),
        other => Err(ProjectionError::UnsupportedSrid(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ontario test points: Toronto, Ottawa, Thunder Bay, Windsor.
    const POINTS: [(f64, f64); 4] = [
        (-79.3832, 43.6532),
        (-75.6972, 45.4215),
        (-89.2477, 48.3809),
        (-83.0130, 42.3149),
    ];

    fn ground_distance_m(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
        // Small-offset equirectangular approximation is plenty here.
        let m_per_deg_lat = 111_320.0;
        let m_per_deg_lng = 111_320.0 * lat1.to_radians().cos();
        let dx = (lng2 - lng1) * m_per_deg_lng;
        let dy = (lat2 - lat1) * m_per_deg_lat;
        dx.hypot(dy)
    }

    #[test]
    fn web_mercator_round_trip_within_a_meter() {
        for (lng, lat) in POINTS {
            let (x, y) = wgs84_to_web_mercator(lng, lat);
            let (lng2, lat2) = web_mercator_to_wgs84(x, y);
            assert!(
                ground_distance_m(lng, lat, lng2, lat2) < 1.0,
                "round trip drifted at ({lng}, {lat})"
            );
        }
    }

    #[test]
    fn utm17n_round_trip_within_a_meter() {
        for (lng, lat) in POINTS {
            let (x, y) = wgs84_to_utm17n(lng, lat);
            let (lng2, lat2) = utm17n_to_wgs84(x, y);
            assert!(
                ground_distance_m(lng, lat, lng2, lat2) < 1.0,
                "round trip drifted at ({lng}, {lat})"
            );
        }
    }

    #[test]
    fn web_mercator_known_value() {
        // Toronto: x is lng scaled by the Mercator bound, y lands near
        // 5 412 km. Sign and magnitude checks; precision is covered by
        // the round-trip test.
        let (x, y) = wgs84_to_web_mercator(-79.3832, 43.6532);
        assert!((x - -8_836_898.0).abs() < 2_000.0, "x was {x}");
        assert!((y - 5_411_900.0).abs() < 8_000.0, "y was {y}");
    }

    #[test]
    fn utm17n_known_value() {
        // Toronto sits ~1.6° east of the zone-17 central meridian, so
        // the easting lands around 630 km and the northing near
        // 4 835 km.
        let (x, y) = wgs84_to_utm17n(-79.3832, 43.6532);
        assert!((629_000.0..=632_000.0).contains(&x), "easting was {x}");
        assert!((4_830_000.0..=4_840_000.0).contains(&y), "northing was {y}");
    }

    #[test]
    fn srid_dispatch() {
        assert_eq!(wgs84_to_service(-79.0, 43.0, 4326), Ok((-79.0, 43.0)));
        assert!(wgs84_to_service(-79.0, 43.0, 102_100).is_ok());
        assert!(wgs84_to_service(-79.0, 43.0, 2958).is_ok());
        assert_eq!(
            wgs84_to_service(-79.0, 43.0, 27_700),
            Err(ProjectionError::UnsupportedSrid(27_700))
        );
        assert_eq!(
            service_to_wgs84(0.0, 0.0, 999),
            Err(ProjectionError::UnsupportedSrid(999))
        );
    }

    #[test]
    fn identity_srid_round_trip() {
        let (x, y) = wgs84_to_service(-79.3832, 43.6532, 4326).unwrap();
        let (lng, lat) = service_to_wgs84(x, y, 4326).unwrap();
        assert!((lng - -79.3832).abs() < f64::EPSILON);
        assert!((lat - 43.6532).abs() < f64::EPSILON);
    }
}
