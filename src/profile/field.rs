//! Confidence-scored field values
//!
//! A `FieldValue` is the leaf of every profile: an observed value, how sure
//! the extractor was about it, and when it last changed.

use super::candidate::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// The observed value of a single profile attribute.
///
/// Serialized untagged so stored documents read `{"value": 70}` or
/// `{"value": ["diabetes"]}` rather than wrapping the variant name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldData {
    /// Numeric value (integers stay integers across a round trip)
    Number(serde_json::Number),
    /// Free-text value
    Text(String),
    /// Set-like list of strings
    List(Vec<String>),
}

impl FieldData {
    /// Shorthand for a text value
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Shorthand for an integer value
    pub fn int(n: i64) -> Self {
        Self::Number(n.into())
    }

    /// Shorthand for a list value
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// The list items, if this is a list
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Canonical text form of a scalar (None for lists)
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.trim().to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::List(_) => None,
        }
    }
}

/// A single profile attribute with its confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Observed value (None until something is extracted)
    pub value: Option<FieldData>,
    /// Confidence in [0.0, 1.0]; 0.0 whenever `value` is None
    #[serde(default)]
    pub confidence: f64,
    /// When the value was last adopted
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl FieldValue {
    /// An unobserved field
    pub fn empty() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            last_updated: None,
        }
    }

    /// An observed field; confidence is clamped to [0.0, 1.0]
    pub fn new(value: FieldData, confidence: f64) -> Self {
        Self {
            value: Some(value),
            confidence: clamp_confidence(confidence),
            last_updated: None,
        }
    }

    /// Attach a last-update timestamp
    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }

    /// True when there is no value or the value is an empty list
    pub fn is_empty(&self) -> bool {
        match &self.value {
            None => true,
            Some(FieldData::List(items)) => items.is_empty(),
            Some(_) => false,
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::empty()
    }
}

/// Deserialize a timestamp written as RFC 3339 or `YYYY-MM-DD HH:MM:SS`
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

/// Like [`deserialize_timestamp`], but null and unreadable text become `None`
pub(crate) fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Clamp a confidence into [0.0, 1.0]; NaN becomes 0.0.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
