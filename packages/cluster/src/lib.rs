#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Location clustering over geocoded addresses.
//!
//! Several address variants ("618 BLOOR ST W" and "618-620 BLOOR ST W",
//! a suite address and its building) geocode to nearly the same point.
//! This module groups geocoded addresses within a proximity threshold
//! (default 50 m) into `loc_NNNNN` clusters using a coarse grid plus
//! union-find, so downstream stages can treat the cluster as one
//! physical location with all of its RT back-references.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use prop_map_coords::haversine_m;

/// Default clustering threshold in meters.
pub const DEFAULT_PROXIMITY_M: f64 = 50.0;

/// Grid cell size in degrees (~50 m at Ontario latitudes).
const CELL_SIZE_DEG: f64 = 0.0005;

/// The role an address played in its RT record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Property,
    Seller,
    Buyer,
}

/// A back-reference from an address to the RT record that mentioned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRef {
    pub rt_id: String,
    pub role: Role,
}

/// A geocoded address entering the clusterer.
#[derive(Debug, Clone)]
pub struct AddressPoint {
    /// Normalized (uppercased) address key.
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    /// Provider-formatted address, if any.
    pub formatted: String,
}

/// An emitted reference, carrying the original address variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    pub rt_id: String,
    pub role: Role,
    pub original_address: String,
}

/// One location cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCluster {
    /// Centroid latitude (mean of members, 7 decimals).
    pub lat: f64,
    /// Centroid longitude (mean of members, 7 decimals).
    pub lng: f64,
    /// Formatted address of the first member.
    pub formatted_address: String,
    /// All member address variants, sorted.
    pub address_variants: Vec<String>,
    /// RT references pulled from the address index.
    pub references: Vec<ClusterRef>,
}

/// Per-RT location lists, split by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleLocations {
    #[serde(default)]
    pub property: Vec<String>,
    #[serde(default)]
    pub seller: Vec<String>,
    #[serde(default)]
    pub buyer: Vec<String>,
}

/// Clustering statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStats {
    pub geocoded_addresses: usize,
    pub locations: usize,
    pub multi_rt_locations: usize,
    pub rt_records_indexed: usize,
    pub proximity_meters: f64,
}

/// The full location index document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationIndex {
    pub built_at: String,
    pub stats: ClusterStats,
    pub locations: BTreeMap<String, LocationCluster>,
    pub address_to_location: BTreeMap<String, String>,
    pub rt_to_locations: BTreeMap<String, RoleLocations>,
}

/// Union-find with path compression and union by rank over integer
/// indices; the address → index map is built once by the caller.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression.
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, x: usize, y: usize) {
        let (mut rx, mut ry) = (self.find(x), self.find(y));
        if rx == ry {
            return;
        }
        if self.rank[rx] < self.rank[ry] {
            std::mem::swap(&mut rx, &mut ry);
        }
        self.parent[ry] = rx;
        if self.rank[rx] == self.rank[ry] {
            self.rank[rx] += 1;
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn grid_key(lat: f64, lng: f64) -> (i64, i64) {
    ((lat / CELL_SIZE_DEG) as i64, (lng / CELL_SIZE_DEG) as i64)
}

fn round7(value: f64) -> f64 {
    (value * 1e7).round() / 1e7
}

/// Clusters geocoded addresses within `proximity_meters` and builds
/// the location index.
///
/// `refs` maps normalized address keys to their RT back-references.
/// Cluster IDs are assigned in enumeration order of union-find roots
/// over the input order; no external consumer depends on specific IDs
/// across runs.
#[must_use]
pub fn build_location_index(
    points: &[AddressPoint],
    refs: &BTreeMap<String, Vec<AddressRef>>,
    proximity_meters: f64,
    built_at: &str,
) -> LocationIndex {
    let mut uf = UnionFind::new(points.len());
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();

    for (i, point) in points.iter().enumerate() {
        grid.entry(grid_key(point.lat, point.lng)).or_default().push(i);
    }

    // Union pairs within threshold, same cell and the 8 neighbors.
    for (i, point) in points.iter().enumerate() {
        let (row, col) = grid_key(point.lat, point.lng);
        for dr in -1..=1 {
            for dc in -1..=1 {
                let Some(neighbors) = grid.get(&(row + dr, col + dc)) else {
                    continue;
                };
                for &j in neighbors {
                    if j <= i || uf.find(i) == uf.find(j) {
                        continue;
                    }
                    let d = haversine_m(point.lat, point.lng, points[j].lat, points[j].lng);
                    if d <= proximity_meters {
                        uf.union(i, j);
                    }
                }
            }
        }
    }

    // Gather members per root, in input order.
    let mut root_members: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut root_slot: HashMap<usize, usize> = HashMap::new();
    for i in 0..points.len() {
        let root = uf.find(i);
        match root_slot.get(&root) {
            Some(&slot) => root_members[slot].1.push(i),
            None => {
                root_slot.insert(root, root_members.len());
                root_members.push((root, vec![i]));
            }
        }
    }

    let mut locations: BTreeMap<String, LocationCluster> = BTreeMap::new();
    let mut address_to_location: BTreeMap<String, String> = BTreeMap::new();
    let mut rt_to_locations: BTreeMap<String, RoleLocations> = BTreeMap::new();
    let mut multi_rt = 0;

    for (counter, (_, members)) in root_members.iter().enumerate() {
        let loc_id = format!("loc_{:05}", counter + 1);

        #[allow(clippy::cast_precision_loss)]
        let n = members.len() as f64;
        let avg_lat = members.iter().map(|&m| points[m].lat).sum::<f64>() / n;
        let avg_lng = members.iter().map(|&m| points[m].lng).sum::<f64>() / n;

        let mut references: Vec<ClusterRef> = Vec::new();
        for &m in members {
            if let Some(addr_refs) = refs.get(&points[m].address) {
                references.extend(addr_refs.iter().map(|r| ClusterRef {
                    rt_id: r.rt_id.clone(),
                    role: r.role,
                    original_address: points[m].address.clone(),
                }));
            }
        }

        let mut rt_ids: Vec<&str> = references.iter().map(|r| r.rt_id.as_str()).collect();
        rt_ids.sort_unstable();
        rt_ids.dedup();
        if rt_ids.len() > 1 {
            multi_rt += 1;
        }

        for reference in &references {
            let entry = rt_to_locations.entry(reference.rt_id.clone()).or_default();
            let list = match reference.role {
                Role::Property => &mut entry.property,
                Role::Seller => &mut entry.seller,
                Role::Buyer => &mut entry.buyer,
            };
            if !list.contains(&loc_id) {
                list.push(loc_id.clone());
            }
        }

        let mut variants: Vec<String> = members.iter().map(|&m| points[m].address.clone()).collect();
        variants.sort();
        variants.dedup();

        for variant in &variants {
            address_to_location.insert(variant.clone(), loc_id.clone());
        }

        locations.insert(
            loc_id,
            LocationCluster {
                lat: round7(avg_lat),
                lng: round7(avg_lng),
                formatted_address: points[members[0]].formatted.clone(),
                address_variants: variants,
                references,
            },
        );
    }

    let stats = ClusterStats {
        geocoded_addresses: points.len(),
        locations: locations.len(),
        multi_rt_locations: multi_rt,
        rt_records_indexed: rt_to_locations.len(),
        proximity_meters,
    };

    log::info!(
        "Location index: {} locations ({} multi-RT) from {} geocoded addresses",
        stats.locations,
        stats.multi_rt_locations,
        stats.geocoded_addresses
    );

    LocationIndex {
        built_at: built_at.to_string(),
        stats,
        locations,
        address_to_location,
        rt_to_locations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(address: &str, lat: f64, lng: f64) -> AddressPoint {
        AddressPoint {
            address: address.to_string(),
            lat,
            lng,
            formatted: format!("{address}, CANADA"),
        }
    }

    fn no_refs() -> BTreeMap<String, Vec<AddressRef>> {
        BTreeMap::new()
    }

    #[test]
    fn nearby_points_cluster_together() {
        // ~11 m apart.
        let points = vec![
            point("A", 43.650_00, -79.380_00),
            point("B", 43.650_10, -79.380_00),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        assert_eq!(index.locations.len(), 1);
        let cluster = &index.locations["loc_00001"];
        assert_eq!(cluster.address_variants, vec!["A", "B"]);
        assert_eq!(
            index.address_to_location.get("B"),
            Some(&"loc_00001".to_string())
        );
    }

    #[test]
    fn distant_points_stay_separate() {
        let points = vec![
            point("A", 43.6500, -79.3800),
            point("B", 43.6600, -79.3800),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        assert_eq!(index.locations.len(), 2);
    }

    #[test]
    fn threshold_is_inclusive_at_exact_distance() {
        // 50.000 m north of A along the meridian: 1 m of latitude is
        // 1/111194.9 degrees with R = 6 371 000.
        let meters_per_deg = 6_371_000.0 * std::f64::consts::PI / 180.0;
        let lat_offset = 50.0 / meters_per_deg;
        let points = vec![
            point("A", 43.6500, -79.3800),
            point("B", 43.6500 + lat_offset, -79.3800),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        assert_eq!(index.locations.len(), 1, "50.000m pair must union");

        let lat_offset_over = 50.001 / meters_per_deg;
        let points = vec![
            point("A", 43.6500, -79.3800),
            point("B", 43.6500 + lat_offset_over, -79.3800),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        assert_eq!(index.locations.len(), 2, "50.001m pair must not union");
    }

    #[test]
    fn chained_proximity_unions_transitively() {
        // A-B and B-C within 50 m, A-C beyond: one cluster of three.
        let meters_per_deg = 6_371_000.0 * std::f64::consts::PI / 180.0;
        let step = 40.0 / meters_per_deg;
        let points = vec![
            point("A", 43.6500, -79.3800),
            point("B", 43.6500 + step, -79.3800),
            point("C", 43.6500 + 2.0 * step, -79.3800),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        assert_eq!(index.locations.len(), 1);
        assert_eq!(index.locations["loc_00001"].address_variants.len(), 3);
    }

    #[test]
    fn cluster_centroid_is_member_mean() {
        let points = vec![
            point("A", 43.6500, -79.3800),
            point("B", 43.6502, -79.3802),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        let cluster = &index.locations["loc_00001"];
        assert!((cluster.lat - 43.6501).abs() < 1e-9);
        assert!((cluster.lng - -79.3801).abs() < 1e-9);
    }

    #[test]
    fn references_carry_roles_and_variants() {
        let points = vec![
            point("618 BLOOR ST W", 43.6500, -79.3800),
            point("620 BLOOR ST W", 43.6501, -79.3800),
        ];
        let mut refs = BTreeMap::new();
        refs.insert(
            "618 BLOOR ST W".to_string(),
            vec![AddressRef {
                rt_id: "RT1".to_string(),
                role: Role::Property,
            }],
        );
        refs.insert(
            "620 BLOOR ST W".to_string(),
            vec![AddressRef {
                rt_id: "RT2".to_string(),
                role: Role::Seller,
            }],
        );
        let index = build_location_index(&points, &refs, 50.0, "t");
        assert_eq!(index.locations.len(), 1);
        let cluster = &index.locations["loc_00001"];
        assert_eq!(cluster.references.len(), 2);
        assert_eq!(index.stats.multi_rt_locations, 1);
        let rt1 = &index.rt_to_locations["RT1"];
        assert_eq!(rt1.property, vec!["loc_00001"]);
        let rt2 = &index.rt_to_locations["RT2"];
        assert_eq!(rt2.seller, vec!["loc_00001"]);
    }

    #[test]
    fn grid_boundary_does_not_split_close_points() {
        // Points straddling a 0.0005-degree cell boundary but only a
        // few meters apart must still union via the neighbor scan.
        let points = vec![
            point("A", 43.650_49, -79.3800),
            point("B", 43.650_51, -79.3800),
        ];
        let index = build_location_index(&points, &no_refs(), 50.0, "t");
        assert_eq!(index.locations.len(), 1);
    }
}
