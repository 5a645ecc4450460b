//! Deterministic query fingerprints.
//!
//! A fingerprint is `<hash(query)>:<hash(params)>` where the query has its
//! whitespace collapsed and the parameters are serialized canonically (see
//! [`QueryParam::canonical_value`]). Each half uses a 64-bit djb2 variant
//! rendered in base 36.
//!
//! The hash is not collision-free. The cache therefore keeps the normalized
//! text next to each entry and only reports a hit when the text matches, so a
//! collision costs a re-execution, never a wrong result.

use crate::models::QueryParam;
use serde_json::Value as JsonValue;

const DJB2_SEED: u64 = 5381;

/// A query fingerprint together with the text it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    key: String,
    query: String,
    params: String,
}

impl Fingerprint {
    /// Fingerprint a query and its parameters.
    pub fn new(query: &str, params: &[QueryParam]) -> Self {
        let query = normalize_query(query);
        let params = normalize_params(params);
        let key = format!(
            "{}:{}",
            to_base36(djb2_64(&query)),
            to_base36(djb2_64(&params))
        );
        Self { key, query, params }
    }

    /// The cache key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whitespace-normalized query text.
    pub fn normalized_query(&self) -> &str {
        &self.query
    }

    /// Canonical parameter serialization.
    pub fn normalized_params(&self) -> &str {
        &self.params
    }

    /// Same normalized query and parameters, not just the same key.
    pub(crate) fn same_source(&self, other: &Fingerprint) -> bool {
        self.query == other.query && self.params == other.params
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Collapse every whitespace run to one space and trim both ends.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical JSON array of the parameters.
pub fn normalize_params(params: &[QueryParam]) -> String {
    JsonValue::Array(params.iter().map(QueryParam::canonical_value).collect()).to_string()
}

/// djb2 (`hash * 33 ^ byte`, seed 5381) over UTF-8 bytes, wrapping at 64 bits.
pub fn djb2_64(input: &str) -> u64 {
    input
        .bytes()
        .fold(DJB2_SEED, |hash, byte| hash.wrapping_mul(33) ^ u64::from(byte))
}

/// Lowercase base-36 rendering.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_normalize_query_collapses_whitespace() {
        assert_eq!(
            normalize_query("  SELECT *\n\tFROM users   WHERE id = ?  "),
            "SELECT * FROM users WHERE id = ?"
        );
    }

    #[test]
    fn test_whitespace_variants_share_fingerprint() {
        let a = Fingerprint::new("SELECT * FROM users WHERE id = ?", &[1.into()]);
        let b = Fingerprint::new("SELECT *\n  FROM users\nWHERE id = ?\n", &[1.into()]);
        assert_eq!(a.key(), b.key());
        assert!(a.same_source(&b));
    }

    #[test]
    fn test_params_change_fingerprint() {
        let a = Fingerprint::new("SELECT * FROM users WHERE id = ?", &[1.into()]);
        let b = Fingerprint::new("SELECT * FROM users WHERE id = ?", &[2.into()]);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key().split(':').next(), b.key().split(':').next());
    }

    #[test]
    fn test_equal_dates_share_fingerprint() {
        let d1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = Fingerprint::new("SELECT 1", &[d1.into()]);
        let b = Fingerprint::new("SELECT 1", &[d2.into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_undefined_and_null_differ() {
        let a = Fingerprint::new("SELECT ?", &[QueryParam::Undefined]);
        let b = Fingerprint::new("SELECT ?", &[QueryParam::Null]);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_bigint_tag_aliases_identical_string() {
        // Tags are plain strings, so a literal carrying the same tag collides
        let big = Fingerprint::new("SELECT ?", &[QueryParam::BigInt(5)]);
        let text = Fingerprint::new("SELECT ?", &[QueryParam::from("__bigint:5")]);
        assert_eq!(big.normalized_params(), text.normalized_params());
    }

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2_64(""), 5381);
        assert_eq!(djb2_64("a"), (5381u64 * 33) ^ 97);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u64::MAX), "3w5e11264sgsf");
    }
}
