//! Canonical address and city normalization for property dedup.
//!
//! Produces the long uppercase form used by dedup keys: abbreviations
//! expand (`BLVD` → `BOULEVARD`), periods are stripped, and community
//! names collapse to their parent municipality (`Scarborough` →
//! `Toronto`). The same input always normalizes to the same output, and
//! normalizing twice is a no-op.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Saint names commonly found in Ontario street names.
/// Used to disambiguate "ST" (Saint) from "ST" (Street).
static SAINT_NAMES: &[&str] = &[
    "CLAIR", "PAUL", "GEORGE", "ANDREW", "DAVID", "LAWRENCE", "THOMAS", "JOSEPH", "JAMES", "JOHN",
    "MICHAEL", "PETER", "PATRICK", "CATHERINE", "ANNE", "MARY", "CHARLES", "LAURENT", "DENIS",
    "HYACINTHE", "ALPHONSE",
];

/// "ST" or "STE" followed by a known saint name. Must run BEFORE the
/// general abbreviation expansion turns the "ST" into "STREET".
static SAINT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let mut names: Vec<&str> = SAINT_NAMES.to_vec();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    Regex::new(&format!(r"\bSTE?\s+({})\b", names.join("|"))).expect("valid regex")
});

/// Street type and directional abbreviations, canonical long form.
static ABBREVIATIONS: &[(&str, &str)] = &[
    ("BLVD", "BOULEVARD"),
    ("PKWY", "PARKWAY"),
    ("CRES", "CRESCENT"),
    ("TERR", "TERRACE"),
    ("AVE", "AVENUE"),
    ("CRT", "COURT"),
    ("HWY", "HIGHWAY"),
    ("CIR", "CIRCLE"),
    ("CT", "COURT"),
    ("DR", "DRIVE"),
    ("LN", "LANE"),
    ("PL", "PLACE"),
    ("RD", "ROAD"),
    ("ST", "STREET"),
    ("E", "EAST"),
    ("W", "WEST"),
    ("N", "NORTH"),
    ("S", "SOUTH"),
    ("NE", "NORTHEAST"),
    ("NW", "NORTHWEST"),
    ("SE", "SOUTHEAST"),
    ("SW", "SOUTHWEST"),
];

static ABBREV_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| ABBREVIATIONS.iter().copied().collect());

/// Whole-word abbreviation matcher, longest alternatives first so
/// "BLVD" wins over any shorter prefix.
static ABBREV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let mut keys: Vec<&str> = ABBREVIATIONS.iter().map(|(k, _)| *k).collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    Regex::new(&format!(r"\b({})\b", keys.join("|"))).expect("valid regex")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Community → municipality aliases. Single source of truth for city
/// canonicalization; the dedup key and the market rollups both read it.
static CITY_ALIASES: &[(&str, &str)] = &[
    ("Sault Ste Marie", "Sault Ste. Marie"),
    ("St Catharines", "St. Catharines"),
    ("N. York", "Toronto"),
    ("North York", "Toronto"),
    ("E. York", "Toronto"),
    ("East York", "Toronto"),
    ("Scarborough", "Toronto"),
    ("Etobicoke", "Toronto"),
    ("York", "Toronto"),
    ("Downsview", "Toronto"),
    ("Willowdale", "Toronto"),
    ("Don Mills", "Toronto"),
    ("Agincourt", "Toronto"),
    ("Weston", "Toronto"),
    ("Rexdale", "Toronto"),
    ("Leaside", "Toronto"),
    ("Woodbridge", "Vaughan"),
    ("Maple", "Vaughan"),
    ("Concord", "Vaughan"),
    ("Kleinburg", "Vaughan"),
    ("Thornhill", "Vaughan"),
    ("Unionville", "Markham"),
    ("Stouffville", "Whitchurch-Stouffville"),
    ("N. Bay", "North Bay"),
    ("N Bay", "North Bay"),
    ("Niagara On The Lake", "Niagara-on-the-Lake"),
    ("Niagara on the Lake", "Niagara-on-the-Lake"),
    ("NOTL", "Niagara-on-the-Lake"),
    ("Quinte W", "Quinte West"),
    ("The Blue Mountains", "Collingwood"),
    ("Blue Mountains", "Collingwood"),
    ("Sudbury", "Greater Sudbury"),
    ("Chatham", "Chatham-Kent"),
    ("Kent", "Chatham-Kent"),
    ("Bowmanville", "Clarington"),
    ("Newcastle", "Clarington"),
    ("Courtice", "Clarington"),
    ("Alliston", "New Tecumseth"),
    ("Tottenham", "New Tecumseth"),
    ("Beeton", "New Tecumseth"),
    ("Simcoe", "Norfolk County"),
    ("Cayuga", "Haldimand County"),
    ("Dunnville", "Haldimand County"),
    ("Caledonia", "Haldimand County"),
    ("Picton", "Prince Edward County"),
    ("Fergus", "Centre Wellington"),
    ("Elora", "Centre Wellington"),
    ("Elmira", "Woolwich"),
    ("Stayner", "Clearview"),
    ("Keswick", "Georgina"),
    ("Sutton", "Georgina"),
    ("Erin Mills", "Mississauga"),
    ("Port Credit", "Mississauga"),
    ("Streetsville", "Mississauga"),
    ("Toronto-North York", "Toronto"),
    ("Toronto-Etobicoke", "Toronto"),
    ("Toronto-Scarborough", "Toronto"),
    ("Toronto-East York", "Toronto"),
    ("Toronto-York", "Toronto"),
    ("Vanier", "Ottawa"),
    ("Rockcliffe Park", "Ottawa"),
    ("Bells Corners", "Ottawa"),
    ("Stittsville", "Ottawa"),
    ("Ottawa-Nepean", "Ottawa"),
    ("Fonthill", "Pelham"),
    ("Fenwick", "Pelham"),
    ("Vineland", "Lincoln"),
    ("Beamsville", "Lincoln"),
    ("Jordan", "Lincoln"),
    ("Crystal Beach", "Fort Erie"),
    ("Ridgeway", "Fort Erie"),
    ("Stevensville", "Fort Erie"),
    ("Port Dalhousie", "St. Catharines"),
    ("Virgil", "Niagara-on-the-Lake"),
    ("Georgetown", "Halton Hills"),
    ("Acton", "Halton Hills"),
    ("Bolton", "Caledon"),
    ("Port Perry", "Scugog"),
    ("Cannington", "Brock"),
    ("Sunderland", "Brock"),
    ("Beaverton", "Brock"),
    ("Cookstown", "Innisfil"),
    ("Angus", "Essa"),
    ("Midhurst", "Springwater"),
    ("Coldwater", "Severn"),
    ("Oro", "Oro-Medonte"),
    ("N. Perth", "North Perth"),
    ("N. Dumfries", "North Dumfries"),
    ("W. Nipissing", "West Nipissing"),
    ("Greater Napanee", "Napanee"),
    ("Smith", "Selwyn"),
    ("St Thomas", "St. Thomas"),
    ("Prince Edward", "Prince Edward County"),
    ("Trenton", "Quinte West"),
    ("Perth E", "Perth East"),
    ("E. Gwillimbury", "East Gwillimbury"),
    ("Waterdown", "Hamilton"),
    ("Amherstview", "Loyalist"),
    ("Westport", "Rideau Lakes"),
    ("New Liskeard", "Temiskaming Shores"),
];

/// Uppercase alias lookup built once.
static CITY_ALIAS_UPPER: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    CITY_ALIASES
        .iter()
        .map(|(from, to)| (from.to_uppercase(), *to))
        .collect()
});

/// Normalizes an address for dedup matching.
///
/// Uppercases, strips periods, collapses whitespace, protects
/// `ST/STE <saint name>` as `SAINT <name>`, then expands street-type
/// and directional abbreviations to their long form.
#[must_use]
pub fn normalize_address_for_dedup(address: &str) -> String {
    let s = address.to_uppercase();
    let s = s.replace('.', "");
    let s = WHITESPACE.replace_all(s.trim(), " ").into_owned();
    let s = SAINT_PATTERN.replace_all(&s, "SAINT $1").into_owned();
    ABBREV_PATTERN
        .replace_all(&s, |caps: &regex::Captures<'_>| ABBREV_MAP[&caps[1]])
        .into_owned()
}

/// Normalizes a city name for dedup matching.
///
/// Uppercase + collapse whitespace, then the community → municipality
/// alias table (case-insensitive).
#[must_use]
pub fn normalize_city_for_dedup(city: &str) -> String {
    let s = WHITESPACE.replace_all(city.trim(), " ").into_owned();
    let upper = s.to_uppercase();
    CITY_ALIAS_UPPER
        .get(&upper)
        .map_or(upper, |canonical| canonical.to_uppercase())
}

/// The unique-per-property dedup key: `NORM_ADDRESS|NORM_CITY`.
#[must_use]
pub fn dedup_key(address: &str, city: &str) -> String {
    format!(
        "{}|{}",
        normalize_address_for_dedup(address),
        normalize_city_for_dedup(city)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_street_types() {
        assert_eq!(
            normalize_address_for_dedup("618 Bloor St W"),
            "618 BLOOR STREET WEST"
        );
        assert_eq!(
            normalize_address_for_dedup("100 Main Blvd."),
            "100 MAIN BOULEVARD"
        );
    }

    #[test]
    fn protects_saint_names() {
        assert_eq!(
            normalize_address_for_dedup("1200 St Clair Ave W"),
            "1200 SAINT CLAIR AVENUE WEST"
        );
        assert_eq!(
            normalize_address_for_dedup("50 Ste Marie St"),
            "50 STE MARIE STREET"
        );
    }

    #[test]
    fn strips_periods_before_expansion() {
        assert_eq!(
            normalize_address_for_dedup("70 King William St."),
            "70 KING WILLIAM STREET"
        );
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(
            normalize_address_for_dedup("  42   Elm   Rd "),
            "42 ELM ROAD"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = ["618 Bloor St W", "1200 St Clair Ave W", "HIGHWAY 6", ""];
        for input in inputs {
            let once = normalize_address_for_dedup(input);
            assert_eq!(normalize_address_for_dedup(&once), once);
        }
    }

    #[test]
    fn city_alias_maps_to_municipality() {
        assert_eq!(normalize_city_for_dedup("Scarborough"), "TORONTO");
        assert_eq!(normalize_city_for_dedup("woodbridge"), "VAUGHAN");
        assert_eq!(normalize_city_for_dedup("NOTL"), "NIAGARA-ON-THE-LAKE");
    }

    #[test]
    fn city_without_alias_uppercases() {
        assert_eq!(normalize_city_for_dedup("Hamilton"), "HAMILTON");
        assert_eq!(
            normalize_city_for_dedup(normalize_city_for_dedup("Scarborough").as_str()),
            "TORONTO"
        );
    }

    #[test]
    fn dedup_key_joins_with_pipe() {
        assert_eq!(
            dedup_key("618 Bloor St W", "Toronto"),
            "618 BLOOR STREET WEST|TORONTO"
        );
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize_address_for_dedup(""), "");
        assert_eq!(normalize_city_for_dedup(""), "");
    }
}
