//! Query parameter values used for fingerprinting.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

/// Sentinel used for a missing parameter in the canonical form.
pub const UNDEFINED_SENTINEL: &str = "__undefined";

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// Missing value (distinct from NULL)
    Undefined,
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Integer beyond the 64-bit range of most drivers' number types
    BigInt(i128),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Timestamp value
    Date(DateTime<Utc>),
    /// Arbitrary JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Json(_) => "json",
        }
    }

    /// Canonical JSON form of this parameter.
    ///
    /// Two parameters with the same meaning always produce the same value:
    /// dates become `"__date:<RFC 3339 with millis>"`, big integers become
    /// `"__bigint:<decimal>"` and a missing parameter becomes a sentinel.
    /// JSON objects keep serde_json's sorted key order.
    pub fn canonical_value(&self) -> JsonValue {
        match self {
            Self::Undefined => JsonValue::String(UNDEFINED_SENTINEL.to_string()),
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::BigInt(v) => JsonValue::String(format!("__bigint:{v}")),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(format!("__float:{v}"))),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => JsonValue::String(format!("__bytes:{}", STANDARD.encode(v))),
            Self::Date(v) => JsonValue::String(format!(
                "__date:{}",
                v.to_rfc3339_opts(SecondsFormat::Millis, true)
            )),
            Self::Json(v) => v.clone(),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i128> for QueryParam {
    fn from(v: i128) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
