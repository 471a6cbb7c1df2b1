//! Attribute values and their store representation.
//!
//! Every attribute kind is a closed enum variant with its own
//! serialize/deserialize pair and its own score derivation. The score is
//! what ordered indexes file an entity under; kinds without a meaningful
//! order (text, json) have none and are indexed through the
//! lexicographic structures instead.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

use crate::error::{CoreError, CoreResult};

/// The attribute name to value mapping of one entity.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// The declared kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 text.
    Text,
    /// UTC timestamp.
    DateTime,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Arbitrary JSON document.
    Json,
}

impl AttrKind {
    /// Short name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::DateTime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::Json => "json",
        }
    }

    /// Whether values of this kind derive a score for ordered indexing.
    #[must_use]
    pub const fn is_scorable(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Float | Self::Bool | Self::DateTime | Self::Date | Self::Time
        )
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    Text(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Arbitrary JSON document.
    Json(serde_json::Value),
}

impl AttrValue {
    /// The kind of this value.
    #[must_use]
    pub const fn kind(&self) -> AttrKind {
        match self {
            Self::Int(_) => AttrKind::Int,
            Self::Float(_) => AttrKind::Float,
            Self::Bool(_) => AttrKind::Bool,
            Self::Text(_) => AttrKind::Text,
            Self::DateTime(_) => AttrKind::DateTime,
            Self::Date(_) => AttrKind::Date,
            Self::Time(_) => AttrKind::Time,
            Self::Json(_) => AttrKind::Json,
        }
    }

    /// Serializes the value to its store string.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Self::Text(v) => v.clone(),
            Self::DateTime(v) => v.to_rfc3339(),
            Self::Date(v) => v.to_string(),
            Self::Time(v) => v.to_string(),
            Self::Json(v) => v.to_string(),
        }
    }

    /// Parses a store string back under the declared kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] naming `attribute` when the raw
    /// string does not parse under `kind`.
    pub fn decode(kind: AttrKind, attribute: &str, raw: &str) -> CoreResult<Self> {
        let invalid =
            |message: String| CoreError::invalid_value(attribute, message);
        match kind {
            AttrKind::Int => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| invalid(format!("'{raw}' is not an integer"))),
            AttrKind::Float => raw
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| invalid(format!("'{raw}' is not a float"))),
            AttrKind::Bool => match raw {
                "1" => Ok(Self::Bool(true)),
                "0" => Ok(Self::Bool(false)),
                _ => Err(invalid(format!("'{raw}' is not a boolean flag"))),
            },
            AttrKind::Text => Ok(Self::Text(raw.to_string())),
            AttrKind::DateTime => DateTime::parse_from_rfc3339(raw)
                .map(|dt| Self::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| invalid(format!("'{raw}' is not an RFC 3339 timestamp: {e}"))),
            AttrKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|e| invalid(format!("'{raw}' is not a date: {e}"))),
            AttrKind::Time => NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
                .map(Self::Time)
                .map_err(|e| invalid(format!("'{raw}' is not a time: {e}"))),
            AttrKind::Json => serde_json::from_str(raw)
                .map(Self::Json)
                .map_err(|e| invalid(format!("invalid JSON: {e}"))),
        }
    }

    /// The score this value files under in ordered indexes, when the kind
    /// has one. Temporal kinds score as epoch seconds; time-of-day as
    /// seconds since midnight.
    #[must_use]
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::DateTime(v) => {
                Some(v.timestamp() as f64 + f64::from(v.timestamp_subsec_micros()) / 1e6)
            }
            Self::Date(v) => {
                Some(v.signed_duration_since(NaiveDate::default()).num_days() as f64 * 86_400.0)
            }
            Self::Time(v) => {
                Some(f64::from(v.num_seconds_from_midnight()) + f64::from(v.nanosecond()) / 1e9)
            }
            Self::Text(_) | Self::Json(_) => None,
        }
    }

    /// Borrows the text content of a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}
