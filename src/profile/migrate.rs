//! Migration from the legacy six-dimension profile layout
//!
//! Older profiles grouped fields as demographics / health / cognitive /
//! emotional / lifestyle / preferences. Fields with a direct counterpart are
//! carried over with their confidence. A few legacy observations imply a
//! value for a new field (poor sleep means low daily energy, living alone
//! means little social support); those are derived with the source
//! confidence. Finally the response style is seeded from what the profile
//! already says about the user. Everything else is dropped.

use super::candidate::parse_candidate;
use super::document::Profile;
use super::field::{FieldData, FieldValue};
use serde_json::{json, Map, Value};

/// `(legacy dimension, legacy field, dimension, field)`
const FIELD_MAP: &[(&str, &str, &str, &str)] = &[
    ("demographics", "age", "identity_language", "age"),
    ("demographics", "gender", "identity_language", "gender"),
    ("demographics", "city_level", "identity_language", "region"),
    ("demographics", "education", "identity_language", "education_level"),
    ("health", "chronic_conditions", "health_safety", "chronic_conditions"),
    ("health", "mobility", "health_safety", "mobility_level"),
    ("cognitive", "digital_literacy", "cognitive_interaction", "digital_literacy"),
    ("emotional", "baseline_mood", "emotional_support", "baseline_mood"),
    ("emotional", "loneliness_level", "emotional_support", "loneliness_level"),
    ("lifestyle", "living_arrangement", "lifestyle_social", "living_situation"),
    ("lifestyle", "hobbies", "lifestyle_social", "core_interests"),
];

const HIGH: &[&str] = &["高", "很高", "严重", "high", "very high", "severe"];

/// How a legacy text value is tested
enum Match {
    /// Equal to one of the words
    OneOf(&'static [&'static str]),
    /// Contains one of the words
    Contains(&'static [&'static str]),
}

impl Match {
    fn test(&self, text: &str) -> bool {
        let text = text.trim();
        match self {
            Match::OneOf(words) => words.iter().any(|w| text.eq_ignore_ascii_case(w)),
            Match::Contains(words) => {
                let lower = text.to_lowercase();
                words.iter().any(|w| lower.contains(w))
            }
        }
    }
}

/// A new field implied by a legacy observation
struct Derivation {
    source: (&'static str, &'static str),
    target: (&'static str, &'static str),
    when: Match,
    value: &'static str,
    /// Used when the legacy leaf has no confidence
    confidence: f64,
}

const DERIVATIONS: &[Derivation] = &[
    Derivation {
        source: ("health", "sleep_quality"),
        target: ("health_safety", "daily_energy_level"),
        when: Match::OneOf(&["差", "不好", "失眠", "poor", "insomnia"]),
        value: "低",
        confidence: 0.6,
    },
    Derivation {
        source: ("cognitive", "memory_status"),
        target: ("cognitive_interaction", "attention_span"),
        when: Match::OneOf(&["健忘", "记性不好", "记忆差", "forgetful", "poor"]),
        value: "short",
        confidence: 0.6,
    },
    Derivation {
        source: ("cognitive", "expression_fluency"),
        target: ("cognitive_interaction", "processing_speed"),
        when: Match::OneOf(&["不流畅", "困难", "halting", "difficult"]),
        value: "slow",
        confidence: 0.6,
    },
    Derivation {
        source: ("emotional", "loneliness_level"),
        target: ("emotional_support", "emotional_support_need"),
        when: Match::OneOf(HIGH),
        value: "高",
        confidence: 0.7,
    },
    Derivation {
        source: ("emotional", "anxiety_level"),
        target: ("health_safety", "risk_sensitivity_level"),
        when: Match::OneOf(HIGH),
        value: "高",
        confidence: 0.6,
    },
    Derivation {
        source: ("lifestyle", "living_arrangement"),
        target: ("lifestyle_social", "social_support_level"),
        when: Match::Contains(&["独居", "一个人", "alone"]),
        value: "低",
        confidence: 0.7,
    },
];

/// Confidence of seeded response-style fields
const SEED_CONFIDENCE: f64 = 0.7;

const LEGACY_DIMENSIONS: &[&str] = &[
    "demographics",
    "health",
    "cognitive",
    "emotional",
    "lifestyle",
    "preferences",
];

/// True when the document uses the legacy layout
pub fn is_legacy(doc: &Value) -> bool {
    doc.as_object()
        .map(|obj| LEGACY_DIMENSIONS.iter().any(|d| obj.contains_key(*d)))
        .unwrap_or(false)
}

/// A legacy leaf holding a non-null value
fn legacy_leaf<'a>(doc: &'a Value, dimension: &str, field: &str) -> Option<&'a Value> {
    doc.get(dimension)
        .and_then(|d| d.get(field))
        .filter(|leaf| leaf.get("value").map_or(false, |v| !v.is_null()))
}

fn put(remapped: &mut Map<String, Value>, dimension: &str, field: &str, leaf: Value) {
    let dim = remapped
        .entry(dimension.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(obj) = dim.as_object_mut() {
        obj.insert(field.to_string(), leaf);
    }
}

/// `{"value": value, "confidence": <source confidence or default>}`
fn derived_leaf(source: &Value, value: &str, default_confidence: f64) -> Value {
    let confidence = source
        .get("confidence")
        .cloned()
        .unwrap_or_else(|| json!(default_confidence));
    json!({"value": value, "confidence": confidence})
}

fn derive_communication_style(doc: &Value, remapped: &mut Map<String, Value>) {
    let Some(leaf) = legacy_leaf(doc, "preferences", "communication_style") else {
        return;
    };
    let Some(style) = leaf.get("value").and_then(Value::as_str) else {
        return;
    };

    if Match::Contains(&["温和", "亲切", "gentle", "warm"]).test(style) {
        put(remapped, "response_style", "formality_level", derived_leaf(leaf, "warm", 0.7));
        put(remapped, "response_style", "emotional_tone", derived_leaf(leaf, "caring", 0.7));
    } else if Match::Contains(&["正式", "formal"]).test(style) {
        put(remapped, "response_style", "formality_level", derived_leaf(leaf, "formal", 0.7));
    } else if Match::Contains(&["简洁", "直接", "concise", "direct"]).test(style) {
        put(remapped, "response_style", "verbosity_level", derived_leaf(leaf, "brief", 0.7));
    }
}

fn text_is(field: Option<&FieldValue>, words: &[&str]) -> bool {
    field
        .and_then(|f| f.value.as_ref())
        .and_then(FieldData::scalar_text)
        .map_or(false, |text| words.iter().any(|w| text.eq_ignore_ascii_case(w)))
}

fn seed(profile: &mut Profile, field: &str, value: &str) {
    if let Some(slot) = profile.get_mut("response_style", field) {
        if slot.is_empty() {
            *slot = FieldValue::new(FieldData::text(value), SEED_CONFIDENCE);
        }
    }
}

/// Fill unset response-style fields from age, attention, loneliness and
/// chronic conditions.
fn seed_response_style(profile: &mut Profile) {
    let elderly = matches!(
        profile.get("identity_language", "age").and_then(|f| f.value.as_ref()),
        Some(FieldData::Number(n)) if n.as_i64().map_or(false, |age| age >= 70)
    );
    let short_attention = text_is(profile.get("cognitive_interaction", "attention_span"), &["short"]);
    let lonely = text_is(
        profile.get("emotional_support", "loneliness_level"),
        &["高", "很高", "high", "very high"],
    );
    let chronic = profile
        .get("health_safety", "chronic_conditions")
        .map_or(false, |f| !f.is_empty());

    if elderly {
        seed(profile, "formality_level", "warm");
    }
    if short_attention {
        seed(profile, "verbosity_level", "brief");
    }
    if lonely {
        seed(profile, "emotional_tone", "caring");
    }
    if chronic {
        seed(profile, "risk_cautiousness", "cautious");
    }
}

/// Convert a legacy profile document into the current schema.
///
/// Leaves go through the candidate parser, so malformed legacy leaves are
/// dropped rather than failing the migration.
pub fn migrate_legacy(doc: &Value) -> Profile {
    let mut remapped: Map<String, Value> = Map::new();

    for (old_dim, old_field, new_dim, new_field) in FIELD_MAP {
        if let Some(leaf) = legacy_leaf(doc, old_dim, old_field) {
            put(&mut remapped, new_dim, new_field, leaf.clone());
        }
    }

    for rule in DERIVATIONS {
        let Some(leaf) = legacy_leaf(doc, rule.source.0, rule.source.1) else {
            continue;
        };
        let observed = leaf.get("value").and_then(Value::as_str);
        if observed.map_or(false, |text| rule.when.test(text)) {
            put(
                &mut remapped,
                rule.target.0,
                rule.target.1,
                derived_leaf(leaf, rule.value, rule.confidence),
            );
        }
    }

    derive_communication_style(doc, &mut remapped);

    let parsed = parse_candidate(&Value::Object(remapped));
    if !parsed.rejected.is_empty() {
        tracing::debug!("Dropped {} malformed legacy fields", parsed.rejected.len());
    }
    let mut profile = parsed.profile;
    seed_response_style(&mut profile);
    profile
}
