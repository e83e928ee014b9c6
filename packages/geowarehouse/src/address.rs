//! MPAC address parsing.
//!
//! GeoWarehouse renders the MPAC site address as one line, e.g.
//! `"121 CONCESSION ST E TILLSONBURG ON N4G4W4"`. The municipality is
//! available separately, so it anchors the street/city split; the
//! postal code and trailing province are peeled off the end first.

use std::sync::LazyLock;

use regex::Regex;

static POSTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]\d[A-Z])\s?(\d[A-Z]\d)\s*$").expect("valid regex"));

static COMPACT_POSTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\d[A-Z]\d[A-Z]\d$").expect("valid regex"));

/// Components parsed out of an MPAC one-line address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAddress {
    pub street: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
}

/// Splits `property_address` into street/city/province/postal using
/// `municipality` as the anchor. Falls back to the comma-separated
/// `summary_address` when the property address is empty.
#[must_use]
pub fn parse_mpac_address(
    property_address: &str,
    municipality: &str,
    summary_address: &str,
) -> ParsedAddress {
    let mut result = ParsedAddress {
        province: "ON".to_string(),
        ..ParsedAddress::default()
    };

    let mut addr = property_address.trim().to_string();

    if addr.is_empty() {
        if !summary_address.is_empty() {
            return parse_summary_address(summary_address);
        }
        return result;
    }

    // 1. Postal code off the end.
    if let Some(m) = POSTAL_RE.captures(&addr) {
        result.postal_code = format!("{} {}", &m[1], &m[2]);
        addr.truncate(m.get(0).expect("whole match").start());
        addr = addr.trim().to_string();
    }

    // 2. Trailing " ON".
    if addr.to_uppercase().ends_with(" ON") {
        addr.truncate(addr.len() - 3);
        addr = addr.trim().to_string();
    }

    // 3. Split street/city at the right-most municipality occurrence
    //    (rfind, so a street that repeats the municipality name still
    //    splits correctly).
    let muni = municipality.trim().to_uppercase();
    if !muni.is_empty() {
        if let Some(idx) = addr.to_uppercase().rfind(&muni) {
            if idx > 0 {
                result.street = addr[..idx].trim().to_string();
                result.city = title_case(municipality.trim());
                return result;
            }
        }
    }

    // Municipality not found in the string: whole remainder is street.
    result.street = addr;
    result.city = if municipality.trim().is_empty() {
        String::new()
    } else {
        title_case(municipality.trim())
    };
    result
}

fn parse_summary_address(summary_address: &str) -> ParsedAddress {
    let mut result = ParsedAddress {
        province: "ON".to_string(),
        ..ParsedAddress::default()
    };
    let parts: Vec<&str> = summary_address.split(',').map(str::trim).collect();

    if let Some(street) = parts.first() {
        result.street = (*street).to_string();
    }
    if let Some(city) = parts.get(1) {
        result.city = title_case(city);
    }
    if parts.len() >= 3 {
        let last = parts[parts.len() - 1];
        if let Some(m) = POSTAL_RE.captures(last) {
            result.postal_code = format!("{} {}", &m[1], &m[2]);
        } else if COMPACT_POSTAL_RE.is_match(last) {
            result.postal_code = format!("{} {}", &last[..3], &last[3..]);
        }
    }
    result
}

/// Title-cases a municipality name ("TILLSONBURG" → "Tillsonburg").
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
