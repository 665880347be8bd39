//! # Cache Key Codec
//!
//! Slot cache keys are six `|`-separated fields:
//!
//! ```text
//! {prefix}|availability|{testCentreId}|{YYYY-MM-DD}|{YYYY-MM-DD}|{TYPE-TYPE}
//! ```
//!
//! Keys are plain strings in the store, so anything read back from a scan is
//! parsed strictly before it is trusted. A key that does not parse is logged
//! and treated as a non-match.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::core::types::SlotQuery;

pub const KEY_DELIMITER: char = '|';
pub const AVAILABILITY_SEGMENT: &str = "availability";
const TEST_TYPE_SEPARATOR: char = '-';
const DATE_FORMAT: &str = "%Y-%m-%d";
const FIELD_COUNT: usize = 6;

/// Builder for slot cache keys and scan patterns
pub struct CacheKey;

impl CacheKey {
    /// Build the key for one query
    ///
    /// `date_to` defaults to `date_from`, and test types are upper-cased, so
    /// the same logical query always maps to the same key.
    pub fn build(
        prefix: &str,
        test_centre_id: &str,
        test_types: &[String],
        date_from: NaiveDate,
        date_to: Option<NaiveDate>,
    ) -> String {
        let date_to = date_to.unwrap_or(date_from);
        let types = test_types
            .iter()
            .map(|t| t.to_uppercase())
            .collect::<Vec<_>>()
            .join(&TEST_TYPE_SEPARATOR.to_string());

        [
            prefix,
            AVAILABILITY_SEGMENT,
            test_centre_id,
            &date_from.format(DATE_FORMAT).to_string(),
            &date_to.format(DATE_FORMAT).to_string(),
            &types,
        ]
        .join(&KEY_DELIMITER.to_string())
    }

    pub fn for_query(prefix: &str, query: &SlotQuery) -> String {
        Self::build(
            prefix,
            &query.test_centre_id,
            &query.test_types,
            query.date_from,
            Some(query.date_to),
        )
    }

    /// Glob pattern matching every key of one test centre
    pub fn pattern(prefix: &str, test_centre_id: &str) -> String {
        format!(
            "{prefix}{d}{AVAILABILITY_SEGMENT}{d}{test_centre_id}{d}*{d}*",
            d = KEY_DELIMITER
        )
    }
}

/// Why a key could not be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedKey {
    #[error("expected 6 fields, found {found}")]
    FieldCount { found: usize },

    #[error("test types field is empty")]
    EmptyTestTypes,

    #[error("invalid {field} date: {value}")]
    InvalidDate { field: &'static str, value: String },
}

/// A decoded cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub prefix: String,
    pub test_centre_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub test_types: Vec<String>,
}

impl ParsedKey {
    pub fn parse(key: &str) -> Result<Self, MalformedKey> {
        let fields: Vec<&str> = key.split(KEY_DELIMITER).collect();
        if fields.len() != FIELD_COUNT {
            return Err(MalformedKey::FieldCount {
                found: fields.len(),
            });
        }

        if fields[5].is_empty() {
            return Err(MalformedKey::EmptyTestTypes);
        }

        let start_date = parse_date("start", fields[3])?;
        let end_date = parse_date("end", fields[4])?;

        Ok(Self {
            prefix: fields[0].to_string(),
            test_centre_id: fields[2].to_string(),
            start_date,
            end_date,
            test_types: fields[5]
                .split(TEST_TYPE_SEPARATOR)
                .map(str::to_string)
                .collect(),
        })
    }

    /// Inclusive on both ends, by calendar day
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// True when any encoded type is in `selected` (already upper-cased)
    pub fn shares_test_type(&self, selected: &[String]) -> bool {
        self.test_types.iter().any(|t| selected.contains(t))
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, MalformedKey> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| MalformedKey::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Does `key` hold slots that a reservation of `selected_test_types` on
/// `selected_date` could affect?
pub fn key_matches(key: &str, selected_test_types: &[String], selected_date: NaiveDate) -> bool {
    match ParsedKey::parse(key) {
        Ok(parsed) => {
            let selected: Vec<String> = selected_test_types
                .iter()
                .map(|t| t.to_uppercase())
                .collect();
            parsed.shares_test_type(&selected) && parsed.covers(selected_date)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Skipping malformed cache key");
            false
        }
    }
}

/// Keep the keys that match, in their original order
pub fn filter_matching_keys(
    keys: &[String],
    selected_test_types: &[String],
    selected_date: NaiveDate,
) -> Vec<String> {
    keys.iter()
        .filter(|key| key_matches(key, selected_test_types, selected_date))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn types(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    const KEY: &str = "ftts|availability|TC1|2020-10-25|2020-10-29|CAR-ADI_P1";

    #[test]
    fn test_build_key() {
        let key = CacheKey::build(
            "ftts",
            "TC1",
            &types(&["car", "adi_p1"]),
            date("2020-10-25"),
            Some(date("2020-10-29")),
        );
        assert_eq!(key, KEY);
    }

    #[test]
    fn test_build_key_ignores_type_case() {
        let lower = CacheKey::build("p", "TC1", &types(&["car"]), date("2021-01-01"), None);
        let upper = CacheKey::build("p", "TC1", &types(&["CAR"]), date("2021-01-01"), None);
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_build_key_defaults_end_date() {
        let implicit = CacheKey::build("p", "TC1", &types(&["CAR"]), date("2021-01-01"), None);
        let explicit = CacheKey::build(
            "p",
            "TC1",
            &types(&["CAR"]),
            date("2021-01-01"),
            Some(date("2021-01-01")),
        );
        assert_eq!(implicit, explicit);
        assert_eq!(implicit, "p|availability|TC1|2021-01-01|2021-01-01|CAR");
    }

    #[test]
    fn test_pattern() {
        assert_eq!(CacheKey::pattern("ftts", "TC1"), "ftts|availability|TC1|*|*");
    }

    #[test]
    fn test_parse_key() {
        let parsed = ParsedKey::parse(KEY).unwrap();
        assert_eq!(parsed.prefix, "ftts");
        assert_eq!(parsed.test_centre_id, "TC1");
        assert_eq!(parsed.start_date, date("2020-10-25"));
        assert_eq!(parsed.end_date, date("2020-10-29"));
        assert_eq!(parsed.test_types, types(&["CAR", "ADI_P1"]));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert_eq!(
            ParsedKey::parse("ftts|availability|TC1|2020-10-25|CAR"),
            Err(MalformedKey::FieldCount { found: 5 })
        );
        assert_eq!(
            ParsedKey::parse("ftts|availability|TC1|2020-10-25|2020-10-29|CAR|extra"),
            Err(MalformedKey::FieldCount { found: 7 })
        );
        assert_eq!(
            ParsedKey::parse("ftts|availability|TC1|2020-10-25|2020-10-29|"),
            Err(MalformedKey::EmptyTestTypes)
        );
        assert!(matches!(
            ParsedKey::parse("ftts|availability|TC1|yesterday|2020-10-29|CAR"),
            Err(MalformedKey::InvalidDate { field: "start", .. })
        ));
    }

    #[test]
    fn test_matches_inclusive_range() {
        let car = types(&["car"]);
        assert!(key_matches(KEY, &car, date("2020-10-25")));
        assert!(key_matches(KEY, &car, date("2020-10-27")));
        assert!(key_matches(KEY, &car, date("2020-10-29")));
        assert!(!key_matches(KEY, &car, date("2020-10-24")));
        assert!(!key_matches(KEY, &car, date("2020-10-30")));
    }

    #[test]
    fn test_matches_requires_shared_test_type() {
        assert!(key_matches(KEY, &types(&["ADI_P1"]), date("2020-10-26")));
        assert!(key_matches(KEY, &types(&["TAXI", "car"]), date("2020-10-26")));
        assert!(!key_matches(KEY, &types(&["TAXI"]), date("2020-10-26")));
        assert!(!key_matches(KEY, &[], date("2020-10-26")));
    }

    #[test]
    fn test_malformed_key_never_matches() {
        let car = types(&["CAR"]);
        assert!(!key_matches("ftts|availability|TC1", &car, date("2020-10-26")));
        assert!(!key_matches(
            "ftts|availability|TC1|2020-10-25|2020-10-29|",
            &car,
            date("2020-10-26")
        ));
        assert!(!key_matches("", &car, date("2020-10-26")));
    }

    #[test]
    fn test_filter_matching_keys_preserves_order() {
        let keys = vec![
            "p|availability|TC1|2020-10-20|2020-10-26|CAR".to_string(),
            "garbage".to_string(),
            "p|availability|TC1|2020-10-27|2020-11-02|CAR".to_string(),
            "p|availability|TC1|2020-10-26|2020-10-26|TAXI".to_string(),
            "p|availability|TC1|2020-10-26|2020-10-26|CAR".to_string(),
        ];

        let matched = filter_matching_keys(&keys, &types(&["CAR"]), date("2020-10-26"));
        assert_eq!(
            matched,
            vec![
                "p|availability|TC1|2020-10-20|2020-10-26|CAR".to_string(),
                "p|availability|TC1|2020-10-26|2020-10-26|CAR".to_string(),
            ]
        );
    }
}
