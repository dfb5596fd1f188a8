//! The profile document
//!
//! A `Profile` always contains every dimension and field declared in
//! [`SCHEMA`](super::schema::SCHEMA). Deserialization conforms arbitrary
//! input to that shape: unknown keys are dropped, missing keys come back
//! empty. Profiles are plain values; clones never share state.

use super::field::{FieldData, FieldValue};
use super::schema::{self, FieldKind, SCHEMA};
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

type DimensionMap = BTreeMap<String, FieldValue>;

/// A user's confidence-scored profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Profile {
    dimensions: BTreeMap<String, DimensionMap>,
}

impl Profile {
    /// A profile with every schema field present and empty
    pub fn empty() -> Self {
        let dimensions = SCHEMA
            .iter()
            .map(|d| {
                let fields = d
                    .fields
                    .iter()
                    .map(|f| (f.name.to_string(), FieldValue::empty()))
                    .collect();
                (d.name.to_string(), fields)
            })
            .collect();
        Self { dimensions }
    }

    /// Get a field by dimension and field name
    pub fn get(&self, dimension: &str, field: &str) -> Option<&FieldValue> {
        self.dimensions.get(dimension).and_then(|d| d.get(field))
    }

    /// Mutable access to a field by dimension and field name
    pub fn get_mut(&mut self, dimension: &str, field: &str) -> Option<&mut FieldValue> {
        self.dimensions.get_mut(dimension).and_then(|d| d.get_mut(field))
    }

    /// Replace a field. Fails for names outside the schema or a value of the
    /// wrong kind (a list in a scalar field or vice versa).
    pub fn set(&mut self, dimension: &str, field: &str, value: FieldValue) -> Result<()> {
        let spec = schema::field(dimension, field)
            .ok_or_else(|| Error::Schema(format!("unknown field {}.{}", dimension, field)))?;
        match (&value.value, spec.kind) {
            (Some(FieldData::List(_)), FieldKind::Scalar) => {
                return Err(Error::Schema(format!(
                    "{}.{} is scalar, got a list",
                    dimension, field
                )));
            }
            (Some(FieldData::Text(_) | FieldData::Number(_)), FieldKind::List) => {
                return Err(Error::Schema(format!(
                    "{}.{} is a list, got a scalar",
                    dimension, field
                )));
            }
            _ => {}
        }
        let slot = self
            .get_mut(dimension, field)
            .ok_or_else(|| Error::Schema(format!("unknown field {}.{}", dimension, field)))?;
        *slot = value;
        Ok(())
    }

    /// Builder-style `set` for fixtures and tests
    pub fn with(mut self, dimension: &str, field: &str, value: FieldValue) -> Result<Self> {
        self.set(dimension, field, value)?;
        Ok(self)
    }

    /// Iterate over `(dimension, field, value)` in schema order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &'static str, &FieldValue)> + '_ {
        SCHEMA.iter().flat_map(move |d| {
            d.fields.iter().filter_map(move |f| {
                self.get(d.name, f.name).map(|v| (d.name, f.name, v))
            })
        })
    }

    /// Number of fields holding a value
    pub fn filled_count(&self) -> usize {
        self.fields().filter(|(_, _, v)| !v.is_empty()).count()
    }

    /// Conform a loosely-shaped map to the schema
    fn conform(mut raw: BTreeMap<String, DimensionMap>) -> Self {
        let mut profile = Self::empty();
        for d in SCHEMA {
            let Some(mut incoming) = raw.remove(d.name) else {
                continue;
            };
            for f in d.fields {
                if let Some(value) = incoming.remove(f.name) {
                    if profile.set(d.name, f.name, value).is_err() {
                        tracing::debug!("Dropping {}.{}: kind mismatch", d.name, f.name);
                    }
                }
            }
        }
        profile
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'de> Deserialize<'de> for Profile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, DimensionMap>::deserialize(deserializer)?;
        Ok(Self::conform(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_profile_has_every_field() {
        let profile = Profile::empty();
        let expected: usize = SCHEMA.iter().map(|d| d.fields.len()).sum();
        assert_eq!(profile.fields().count(), expected);
        assert_eq!(profile.filled_count(), 0);
    }

    #[test]
    fn test_set_and_get() {
        let mut profile = Profile::empty();
        profile
            .set("identity_language", "age", FieldValue::new(FieldData::int(70), 0.9))
            .unwrap();
        let age = profile.get("identity_language", "age").unwrap();
        assert_eq!(age.value, Some(FieldData::int(70)));
        assert_eq!(profile.filled_count(), 1);
    }

    #[test]
    fn test_set_rejects_unknown_names() {
        let mut profile = Profile::empty();
        let v = FieldValue::new(FieldData::text("x"), 0.5);
        assert!(profile.set("identity_language", "favourite_colour", v.clone()).is_err());
        assert!(profile.set("hobbies", "age", v).is_err());
    }

    #[test]
    fn test_set_rejects_kind_mismatch() {
        let mut profile = Profile::empty();
        let list = FieldValue::new(FieldData::list(["a"]), 0.5);
        assert!(profile.set("identity_language", "age", list).is_err());
        let text = FieldValue::new(FieldData::text("tea"), 0.5);
        assert!(profile.set("lifestyle_social", "core_interests", text).is_err());
    }

    #[test]
    fn test_deserialize_conforms_to_schema() {
        let input = json!({
            "identity_language": {
                "age": {"value": 70, "confidence": 0.9, "last_updated": null},
                "shoe_size": {"value": 42, "confidence": 0.9, "last_updated": null}
            },
            "astrology": {"sign": {"value": "leo", "confidence": 1.0}}
        });
        let profile: Profile = serde_json::from_value(input).unwrap();
        assert_eq!(
            profile.get("identity_language", "age").unwrap().value,
            Some(FieldData::int(70))
        );
        assert!(profile.get("identity_language", "shoe_size").is_none());
        assert!(profile.get("astrology", "sign").is_none());
        // Missing dimensions are filled in
        assert!(profile.get("response_style", "verbosity_level").unwrap().is_empty());
    }

    #[test]
    fn test_serialized_shape_is_nested_object() {
        let profile = Profile::empty()
            .with("health_safety", "chronic_conditions", FieldValue::new(FieldData::list(["diabetes"]), 0.8))
            .unwrap();
        let v = serde_json::to_value(&profile).unwrap();
        assert_eq!(v["health_safety"]["chronic_conditions"]["value"], json!(["diabetes"]));
        assert_eq!(v["identity_language"]["age"]["value"], json!(null));
    }

    #[test]
    fn test_round_trip_is_exact() {
        let profile = Profile::empty()
            .with("identity_language", "age", FieldValue::new(FieldData::int(70), 0.9))
            .unwrap()
            .with("identity_language", "region", FieldValue::new(FieldData::text("Shijiazhuang"), 0.85))
            .unwrap()
            .with("lifestyle_social", "core_interests", FieldValue::new(FieldData::list(["chess", "opera"]), 0.7))
            .unwrap();
        let text = serde_json::to_string_pretty(&profile).unwrap();
        let back: Profile = serde_json::from_str(&text).unwrap();
        assert_eq!(back, profile);
    }
}
