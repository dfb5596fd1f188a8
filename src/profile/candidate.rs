//! Lenient parsing of candidate profile fragments
//!
//! Candidates come from an external extractor and are only loosely shaped
//! like a profile. Parsing never fails as a whole: each leaf is either
//! coerced into a `FieldValue` or rejected on its own, and everything
//! outside the schema is ignored.

use super::document::Profile;
use super::field::{clamp_confidence, FieldData, FieldValue};
use super::schema::{FieldKind, SCHEMA};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// A candidate leaf that could not be used
#[derive(Debug, Clone, PartialEq)]
pub struct LeafRejection {
    pub dimension: String,
    pub field: String,
    pub reason: String,
}

/// Result of parsing a candidate fragment
#[derive(Debug, Clone)]
pub struct ParsedCandidate {
    /// Usable leaves; everything absent from the input is empty
    pub profile: Profile,
    /// Leaves that were present but malformed
    pub rejected: Vec<LeafRejection>,
}

/// Parse a candidate fragment.
///
/// Non-object input yields an empty candidate with no rejections.
pub fn parse_candidate(input: &Value) -> ParsedCandidate {
    let mut profile = Profile::empty();
    let mut rejected = Vec::new();

    let Some(root) = input.as_object() else {
        return ParsedCandidate { profile, rejected };
    };

    for d in SCHEMA {
        let Some(dim_value) = root.get(d.name) else {
            continue;
        };
        let Some(dim) = dim_value.as_object() else {
            rejected.push(LeafRejection {
                dimension: d.name.to_string(),
                field: String::new(),
                reason: "dimension is not an object".to_string(),
            });
            continue;
        };

        for f in d.fields {
            let Some(raw) = dim.get(f.name) else {
                continue;
            };
            match parse_leaf(raw, f.kind) {
                Ok(Some(field)) => {
                    if let Some(slot) = profile.get_mut(d.name, f.name) {
                        *slot = field;
                    }
                }
                Ok(None) => {}
                Err(reason) => rejected.push(LeafRejection {
                    dimension: d.name.to_string(),
                    field: f.name.to_string(),
                    reason,
                }),
            }
        }
    }

    ParsedCandidate { profile, rejected }
}

/// Parse one leaf. `Ok(None)` means "present but carries no value".
fn parse_leaf(raw: &Value, kind: FieldKind) -> Result<Option<FieldValue>, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| "leaf is not an object".to_string())?;
    let value = obj
        .get("value")
        .ok_or_else(|| "leaf has no value key".to_string())?;

    let data = match parse_value(value, kind)? {
        Some(data) => data,
        None => return Ok(None),
    };

    let confidence = obj.get("confidence").map(parse_confidence).unwrap_or(0.0);
    let last_updated = obj
        .get("last_updated")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    Ok(Some(FieldValue {
        value: Some(data),
        confidence,
        last_updated,
    }))
}

fn parse_value(value: &Value, kind: FieldKind) -> Result<Option<FieldData>, String> {
    match (value, kind) {
        (Value::Null, _) => Ok(None),
        (Value::String(s), FieldKind::Scalar) => Ok(Some(FieldData::Text(s.clone()))),
        (Value::Number(n), FieldKind::Scalar) => Ok(Some(FieldData::Number(n.clone()))),
        (Value::Bool(b), FieldKind::Scalar) => Ok(Some(FieldData::Text(b.to_string()))),
        (Value::Array(_), FieldKind::Scalar) => Err("list given for a scalar field".to_string()),
        (Value::Array(items), FieldKind::List) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => return Err("list contains a non-string item".to_string()),
                }
            }
            Ok(Some(FieldData::List(out)))
        }
        // A lone string for a list field is read as a one-element list
        (Value::String(s), FieldKind::List) => Ok(Some(FieldData::List(vec![s.clone()]))),
        (Value::Object(_), _) => Err("value is an object".to_string()),
        (_, FieldKind::List) => Err("scalar given for a list field".to_string()),
    }
}

fn parse_confidence(raw: &Value) -> f64 {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.map(clamp_confidence).unwrap_or(0.0)
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS` (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
