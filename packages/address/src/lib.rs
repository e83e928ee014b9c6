#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Address handling for the property pipeline.
//!
//! Three concerns live here because every other package needs at least
//! one of them:
//!
//! 1. **Dedup normalization** ([`normalize`]) — the canonical uppercase
//!    long form (`ST` → `STREET`, `Scarborough` → `Toronto`) used to
//!    build the `NORM_ADDRESS|NORM_CITY` dedup key shared by the
//!    registry, the GeoWarehouse resolver, and the brand importer.
//! 2. **Compound expansion** ([`expander`]) — splitting listing-style
//!    addresses (`"92, 102 & 112 COMMERCE PARK DR"`) into individual
//!    geocodable strings.
//! 3. **Match-side similarity** ([`similarity`]) — street-number
//!    extraction and fuzzy street-name scoring used by the brand
//!    matcher. Note this normalizes toward *short* suffix forms
//!    (`STREET` → `ST`), the opposite direction of dedup
//!    normalization; the two serve different lookups and must not be
//!    mixed.

pub mod expander;
pub mod normalize;
pub mod similarity;

pub use expander::{expand_compound_address, is_legal_description, is_po_box, normalize_party_address};
pub use normalize::{dedup_key, normalize_address_for_dedup, normalize_city_for_dedup};
pub use similarity::{extract_street_number, normalize_city, street_name_tokens, street_similarity};
