//! Compound-address expansion for geocoding.
//!
//! Listing addresses frequently cover several street numbers at once:
//! ranges (`"138 - 142 MAIN ST"`), ampersand pairs, comma lists, and
//! combinations of all three. Geocoders want one number per query, so
//! each compound form expands to its individual addresses with the
//! city/province suffix appended. Ranges expand to their endpoints
//! only — interpolating the numbers in between would invent addresses
//! that may not exist.

use std::sync::LazyLock;

use regex::Regex;

/// A street number with an optional letter/half suffix: 620A, 373B, 30½, 900-A.
const NUM: &str = r"\d+(?:-?[A-Za-z½])?";

/// "92, 102 & 112 COMMERCE PARK DR" — comma list closed by an ampersand.
static COMMA_AMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^({NUM}(?:\s*,\s*{NUM})*)\s*&\s*({NUM})\s+(.+)$")).expect("valid regex")
});

/// "21 & 111 COMMERCE PARK DR" — two numbers joined by an ampersand.
static AMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^({NUM})\s*&\s*({NUM})\s+(.+)$")).expect("valid regex"));

/// "138 - 142 COMMERCE PARK DR" — a number range (hyphen or en dash).
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^({NUM})\s*[-\u{{2013}}]\s*({NUM})\s+(.+)$")).expect("valid regex")
});

/// "9 - 15 & 21 DUNDURN ST N" — range followed by an ampersand number.
static RANGE_AMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({NUM}\s*[-\u{{2013}}]\s*{NUM})\s*&\s*({NUM})\s+(.+)$"
    ))
    .expect("valid regex")
});

/// "230 - 238, 244 BLOOR ST W" — range followed by a comma number.
static RANGE_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({NUM}\s*[-\u{{2013}}]\s*{NUM})\s*,\s*({NUM})\s+(.+)$"
    ))
    .expect("valid regex")
});

/// "316, 328 - 330 ST CLAIR ST" — comma number followed by a range.
static COMMA_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({NUM})\s*,\s*({NUM}\s*[-\u{{2013}}]\s*{NUM})\s+(.+)$"
    ))
    .expect("valid regex")
});

/// "4, 8, 16 MAIN ST N" — plain comma list, no ampersand.
static COMMA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^({NUM}(?:\s*,\s*{NUM})+)\s+(.+)$")).expect("valid regex")
});

/// Legal description keywords — these are not splittable street addresses.
static LEGAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)(?:LOT|LOTS|BLOCK|BLOCKS|PLAN|PT\s+LOT|PART\s+LOT|PART\s+CONC|PART\s+CONCS)\b")
        .expect("valid regex")
});

/// "CONC" as a legal keyword — but not "CONC ST", "CONC RD", etc.
static CONC_LEGAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCONC\s+\d").expect("valid regex"));

/// Highway compound name: "HIGHWAY 6 & 21" — the & joins highway
/// numbers, not street numbers.
static HIGHWAY_AMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bH(?:IGH)?W(?:A)?Y\s+\d+\s*&\s*\d+").expect("valid regex"));

static PO_BOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s,])(?:PO\s*BOX|P\.?O\.?\s*BOX|BOX\s+\d|GENERAL\s+DELIVERY)")
        .expect("valid regex")
});

static LEGAL_SKIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:CONC|LOT|LOTS|BLOCK|BLOCKS|PLAN|PT\s+LOT|PART\s+LOT|PART\s+CONC|PART\s+CONCS|CONDO\s+PLAN)\b")
        .expect("valid regex")
});

/// Province keywords for detecting whether an address already carries
/// a province component. English names only; French forms pass through
/// unrecognized.
static PROVINCES: &[&str] = &[
    "ontario",
    "quebec",
    "alberta",
    "british columbia",
    "manitoba",
    "saskatchewan",
    "nova scotia",
    "new brunswick",
    "newfoundland",
    "prince edward island",
    "yukon",
    "northwest territories",
    "nunavut",
];

/// Returns `true` if the address is a PO Box / general delivery
/// destination that cannot be geocoded to a parcel.
#[must_use]
pub fn is_po_box(address: &str) -> bool {
    !address.is_empty() && PO_BOX_RE.is_match(address)
}

/// Returns `true` if the address is a legal land description rather
/// than a street address.
///
/// Only flags non-digit-starting addresses — a street address like
/// "190 BALSAM ST" that happens to contain "LOT" in a suffix is fine.
#[must_use]
pub fn is_legal_description(address: &str) -> bool {
    let Some(first) = address.chars().next() else {
        return false;
    };
    if first.is_ascii_digit() {
        return false;
    }
    LEGAL_SKIP_RE.is_match(address)
}

/// Expands a compound address into individual geocodable addresses.
///
/// Handles comma+ampersand lists, ampersand pairs, ranges (endpoints
/// only, never interpolated), comma lists, range/comma combinations,
/// letter suffixes, and parenthesized addresses. Legal descriptions
/// and highway compound names are returned unsplit. Every result gets
/// a `", City, Province"` suffix.
#[must_use]
pub fn expand_compound_address(address: &str, city: &str, province: &str) -> Vec<String> {
    let mut address = address.trim();
    if address.is_empty() {
        return Vec::new();
    }

    // Strip surrounding parentheses: "(74 - 76 YORK ST)"
    if address.starts_with('(') && address.ends_with(')') {
        address = address[1..address.len() - 1].trim();
    }

    let suffix = build_suffix(city, province);

    // Guards first: these are names, not number lists.
    if LEGAL_RE.is_match(address) || CONC_LEGAL_RE.is_match(address) {
        return vec![format!("{address}{suffix}")];
    }
    if HIGHWAY_AMP_RE.is_match(address) {
        return vec![format!("{address}{suffix}")];
    }

    // Comma+& pattern first (most specific).
    if let Some(m) = COMMA_AMP_RE.captures(address) {
        let mut nums: Vec<&str> = m[1].split(',').map(str::trim).collect();
        let last = m.get(2).map_or("", |g| g.as_str());
        nums.push(last);
        let street = &m[3];
        return nums
            .iter()
            .map(|n| format!("{n} {street}{suffix}"))
            .collect();
    }

    // Range+&: expand the range part, then append the & number.
    if let Some(m) = RANGE_AMP_RE.captures(address) {
        let (range_part, amp_num, street) = (&m[1], &m[2], &m[3]);
        let mut results = expand_compound_address(&format!("{range_part} {street}"), city, province);
        results.push(format!("{amp_num} {street}{suffix}"));
        return results;
    }

    // Simple & pair.
    if let Some(m) = AMP_RE.captures(address) {
        let (num1, num2, street) = (&m[1], &m[2], &m[3]);
        return vec![
            format!("{num1} {street}{suffix}"),
            format!("{num2} {street}{suffix}"),
        ];
    }

    // Range+comma: "230 - 238, 244 BLOOR ST W".
    if let Some(m) = RANGE_COMMA_RE.captures(address) {
        let (range_part, comma_num, street) = (&m[1], &m[2], &m[3]);
        let mut results = expand_compound_address(&format!("{range_part} {street}"), city, province);
        results.push(format!("{comma_num} {street}{suffix}"));
        return results;
    }

    // Comma+range: "316, 328 - 330 ST CLAIR ST".
    if let Some(m) = COMMA_RANGE_RE.captures(address) {
        let (comma_num, range_part, street) = (&m[1], &m[2], &m[3]);
        let mut results = vec![format!("{comma_num} {street}{suffix}")];
        results.extend(expand_compound_address(
            &format!("{range_part} {street}"),
            city,
            province,
        ));
        return results;
    }

    // Range: endpoints only.
    if let Some(m) = RANGE_RE.captures(address) {
        let (start, end, street) = (&m[1], &m[2], &m[3]);
        if start == end {
            return vec![format!("{start} {street}{suffix}")];
        }
        return vec![
            format!("{start} {street}{suffix}"),
            format!("{end} {street}{suffix}"),
        ];
    }

    // Comma-only list.
    if let Some(m) = COMMA_RE.captures(address) {
        let street = m.get(2).map_or("", |g| g.as_str());
        return m[1]
            .split(',')
            .map(|n| format!("{} {street}{suffix}", n.trim()))
            .collect();
    }

    vec![format!("{address}{suffix}")]
}

/// Normalizes a party (buyer/seller) address: appends city/province
/// only when the address does not already name a province.
///
/// Party addresses are usually already complete single addresses like
/// "18 York St, Ste 1500, Toronto, Ontario, M5J 2T8".
#[must_use]
pub fn normalize_party_address(address: &str, city: &str, province: &str) -> String {
    if address.is_empty() {
        return String::new();
    }
    if has_province(address) {
        return address.to_string();
    }
    format!("{address}{}", build_suffix(city, province))
}

fn build_suffix(city: &str, province: &str) -> String {
    let parts: Vec<&str> = [city, province]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(", {}", parts.join(", "))
    }
}

fn has_province(address: &str) -> bool {
    let lowered = address.to_lowercase();
    PROVINCES.iter().any(|p| lowered.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(address: &str) -> Vec<String> {
        expand_compound_address(address, "Barrie", "Ontario")
    }

    #[test]
    fn plain_address_gets_suffix() {
        assert_eq!(
            expand("500 HURONIA RD"),
            vec!["500 HURONIA RD, Barrie, Ontario"]
        );
    }

    #[test]
    fn comma_amp_list_expands() {
        assert_eq!(
            expand("92, 102 & 112 COMMERCE PARK DR"),
            vec![
                "92 COMMERCE PARK DR, Barrie, Ontario",
                "102 COMMERCE PARK DR, Barrie, Ontario",
                "112 COMMERCE PARK DR, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn simple_amp_expands_to_pair() {
        assert_eq!(
            expand("21 & 111 COMMERCE PARK DR"),
            vec![
                "21 COMMERCE PARK DR, Barrie, Ontario",
                "111 COMMERCE PARK DR, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn range_expands_to_endpoints_only() {
        assert_eq!(
            expand("138 - 142 MAIN ST"),
            vec!["138 MAIN ST, Barrie, Ontario", "142 MAIN ST, Barrie, Ontario"]
        );
    }

    #[test]
    fn range_amp_combo() {
        assert_eq!(
            expand("9 - 15 & 21 DUNDURN ST N"),
            vec![
                "9 DUNDURN ST N, Barrie, Ontario",
                "15 DUNDURN ST N, Barrie, Ontario",
                "21 DUNDURN ST N, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn range_comma_combo() {
        assert_eq!(
            expand("230 - 238, 244 BLOOR ST W"),
            vec![
                "230 BLOOR ST W, Barrie, Ontario",
                "238 BLOOR ST W, Barrie, Ontario",
                "244 BLOOR ST W, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn comma_range_combo() {
        assert_eq!(
            expand("316, 328 - 330 ST CLAIR ST"),
            vec![
                "316 ST CLAIR ST, Barrie, Ontario",
                "328 ST CLAIR ST, Barrie, Ontario",
                "330 ST CLAIR ST, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn comma_list_without_amp() {
        assert_eq!(
            expand("4, 8, 16 MAIN ST N"),
            vec![
                "4 MAIN ST N, Barrie, Ontario",
                "8 MAIN ST N, Barrie, Ontario",
                "16 MAIN ST N, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn letter_suffix_survives_range() {
        assert_eq!(
            expand("618 - 620A BLOOR ST W"),
            vec![
                "618 BLOOR ST W, Barrie, Ontario",
                "620A BLOOR ST W, Barrie, Ontario",
            ]
        );
    }

    #[test]
    fn degenerate_range_collapses() {
        assert_eq!(expand("142 - 142 MAIN ST"), vec!["142 MAIN ST, Barrie, Ontario"]);
    }

    #[test]
    fn parenthesized_address_unwraps() {
        assert_eq!(
            expand("(74 - 76 YORK ST)"),
            vec!["74 YORK ST, Barrie, Ontario", "76 YORK ST, Barrie, Ontario"]
        );
    }

    #[test]
    fn highway_amp_is_not_split() {
        assert_eq!(
            expand("HIGHWAY 6 & 21"),
            vec!["HIGHWAY 6 & 21, Barrie, Ontario"]
        );
        assert_eq!(expand("HWY 9 & 27"), vec!["HWY 9 & 27, Barrie, Ontario"]);
    }

    #[test]
    fn legal_description_is_not_split() {
        assert_eq!(expand("LOT 5 CONC 3"), vec!["LOT 5 CONC 3, Barrie, Ontario"]);
        assert_eq!(
            expand("PT LOT 12, PLAN 51M-346"),
            vec!["PT LOT 12, PLAN 51M-346, Barrie, Ontario"]
        );
    }

    #[test]
    fn empty_address_expands_to_nothing() {
        assert!(expand("").is_empty());
    }

    #[test]
    fn po_box_detection() {
        assert!(is_po_box("PO BOX 339, BARRIE"));
        assert!(is_po_box("P.O. Box 12"));
        assert!(is_po_box("GENERAL DELIVERY"));
        assert!(!is_po_box("500 HURONIA RD"));
        assert!(!is_po_box(""));
    }

    #[test]
    fn legal_description_detection() {
        assert!(is_legal_description("LOT 5 CONC 3"));
        assert!(is_legal_description("PT LOT 12 PLAN 100"));
        assert!(!is_legal_description("190 BALSAM ST LOT"));
        assert!(!is_legal_description(""));
    }

    #[test]
    fn party_address_with_province_passes_through() {
        assert_eq!(
            normalize_party_address("18 York St, Toronto, Ontario, M5J 2T8", "Barrie", "Ontario"),
            "18 York St, Toronto, Ontario, M5J 2T8"
        );
    }

    #[test]
    fn party_address_without_province_gets_suffix() {
        assert_eq!(
            normalize_party_address("18 York St", "Toronto", "Ontario"),
            "18 York St, Toronto, Ontario"
        );
    }

    #[test]
    fn party_address_french_province_passes_through_unchanged() {
        // "Québec" is not in the English keyword set, so the suffix is
        // appended even though the address names a province.
        assert_eq!(
            normalize_party_address("1 Rue Principale, Gatineau, Québec", "Toronto", "Ontario"),
            "1 Rue Principale, Gatineau, Québec, Toronto, Ontario"
        );
    }
}
