//! Street-name similarity scoring for brand-to-property matching.
//!
//! Candidate properties are bucketed by (street number, city); this
//! module ranks the candidates inside a bucket. Street names are
//! tokenized with suffixes normalized to their *short* canonical form
//! (`STREET` → `ST`) so that "70 King William St" and "70 KING WILLIAM
//! STREET" compare equal, then scored with the Ratcliff/Obershelp
//! ratio.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)").expect("valid regex"));

/// Suite/unit prefixes like "B03-", "B-4 ", "G3-", "K1-", "B-10-1-".
static SUITE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]\d*(?:-\d+)*[-\s]+").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Street suffixes normalized to canonical short form, plus direction
/// contractions and already-abbreviated period forms.
static SUFFIX_MAP: &[(&str, &str)] = &[
    ("STREET", "ST"),
    ("AVENUE", "AVE"),
    ("BOULEVARD", "BLVD"),
    ("DRIVE", "DR"),
    ("ROAD", "RD"),
    ("CRESCENT", "CRES"),
    ("COURT", "CRT"),
    ("PLACE", "PL"),
    ("LANE", "LN"),
    ("CIRCLE", "CIR"),
    ("TERRACE", "TER"),
    ("TRAIL", "TRL"),
    ("PARKWAY", "PKY"),
    ("HIGHWAY", "HWY"),
    ("GROVE", "GRV"),
    ("GARDENS", "GDNS"),
    ("SQUARE", "SQ"),
    ("HEIGHTS", "HTS"),
    ("RIDGE", "RDG"),
    ("EAST", "E"),
    ("WEST", "W"),
    ("NORTH", "N"),
    ("SOUTH", "S"),
    ("NORTHEAST", "NE"),
    ("NORTHWEST", "NW"),
    ("SOUTHEAST", "SE"),
    ("SOUTHWEST", "SW"),
];

static SUFFIX_LOOKUP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| SUFFIX_MAP.iter().copied().collect());

/// Matcher-side city aliases — grown as the unmatched list reveals gaps.
/// Distinct from the dedup alias table: this one canonicalizes *brand
/// feed* spellings toward registry spellings without collapsing
/// communities into municipalities.
static CITY_ALIASES: &[(&str, &str)] = &[
    ("N. YORK", "NORTH YORK"),
    ("N.YORK", "NORTH YORK"),
    ("ST. CATHARINES", "ST CATHARINES"),
    ("ST.CATHARINES", "ST CATHARINES"),
    ("SAINT CATHARINES", "ST CATHARINES"),
    ("ST. THOMAS", "ST THOMAS"),
    ("ST.THOMAS", "ST THOMAS"),
    ("SAINT THOMAS", "ST THOMAS"),
    ("STE. MARIE", "STE MARIE"),
    ("SAULT STE MARIE", "SAULT STE. MARIE"),
];

static CITY_ALIAS_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| CITY_ALIASES.iter().copied().collect());

/// Normalizes a city for matching: uppercase, collapse whitespace,
/// apply the matcher alias table.
#[must_use]
pub fn normalize_city(city: &str) -> String {
    let c = city.to_uppercase();
    let c = WHITESPACE.replace_all(c.trim(), " ").into_owned();
    CITY_ALIAS_MAP
        .get(c.as_str())
        .map_or(c, ToString::to_string)
}

/// Extracts the leading street number from an address.
///
/// Handles suite/unit prefixes: "B03-70 King William St" → "70".
#[must_use]
pub fn extract_street_number(address: &str) -> Option<String> {
    let addr = address.trim();
    if let Some(m) = NUMBER_RE.captures(addr) {
        return Some(m[1].to_string());
    }
    let stripped = SUITE_PREFIX_RE.replace(addr, "");
    NUMBER_RE.captures(&stripped).map(|m| m[1].to_string())
}

/// Street name tokens after the leading number, with suffixes
/// normalized to short form.
#[must_use]
pub fn street_name_tokens(address: &str) -> Vec<String> {
    let addr = address.trim().to_uppercase();
    let addr = SUITE_PREFIX_RE.replace(&addr, "");
    let addr = NUMBER_RE.replace(&addr, "");
    let addr = addr.trim().trim_start_matches(['-', ' ']);

    addr.split_whitespace()
        .filter_map(|t| {
            let clean = t.trim_end_matches(['.', ',']);
            let mapped = SUFFIX_LOOKUP.get(clean).copied().unwrap_or(clean);
            if mapped.is_empty() {
                None
            } else {
                Some(mapped.to_string())
            }
        })
        .collect()
}

/// Compares two addresses by street-name similarity, 0.0 to 1.0.
#[must_use]
pub fn street_similarity(addr_a: &str, addr_b: &str) -> f64 {
    let tokens_a = street_name_tokens(addr_a);
    let tokens_b = street_name_tokens(addr_b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    ratcliff_obershelp(&tokens_a.join(" "), &tokens_b.join(" "))
}

/// Ratcliff/Obershelp similarity: twice the number of matching
/// characters (longest common substring, recursing into the pieces on
/// either side) over the total length of both strings.
#[must_use]
pub fn ratcliff_obershelp(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = matching_chars(&a, &b);
    #[allow(clippy::cast_precision_loss)]
    {
        2.0 * matches as f64 / (a.len() + b.len()) as f64
    }
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (a_start, b_start, len) = longest_common_run(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..a_start], &b[..b_start])
        + matching_chars(&a[a_start + len..], &b[b_start + len..])
}

/// Longest common substring as (start in a, start in b, length).
fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j] = length of common run ending at a[i], b[j]
    let mut lengths = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut prev = 0;
        for (j, cb) in b.iter().enumerate() {
            let current = lengths[j + 1];
            if ca == cb {
                let run = prev + 1;
                lengths[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            } else {
                lengths[j + 1] = 0;
            }
            prev = current;
        }
    }
    best
}
