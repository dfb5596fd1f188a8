//! Profile evaluator
//!
//! A field is gradable when the reference has a value for it (an empty list
//! counts as no value). Scalars must match; lists need a non-empty overlap.

use crate::profile::{parse_candidate, FieldData, Profile, SCHEMA};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Grade of one gradable field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldGrade {
    pub dimension: String,
    pub field: String,
    pub correct: bool,
}

/// Accuracy of an extracted profile against a reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// `correct_fields / total_fields`, 0.0 when nothing is gradable
    pub overall_accuracy: f64,
    /// Per-dimension accuracy for every schema dimension
    pub dimension_accuracy: BTreeMap<String, f64>,
    pub total_fields: usize,
    pub correct_fields: usize,
    /// Every gradable field, in schema order
    pub fields: Vec<FieldGrade>,
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

fn as_items(data: &FieldData) -> Vec<String> {
    match data {
        FieldData::List(items) => items.iter().map(|s| s.trim().to_string()).collect(),
        scalar => scalar.scalar_text().into_iter().collect(),
    }
}

fn values_match(reference: &FieldData, extracted: &FieldData) -> bool {
    match (reference, extracted) {
        (FieldData::Number(a), FieldData::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (FieldData::List(_), _) | (_, FieldData::List(_)) => {
            let wanted = as_items(reference);
            as_items(extracted).iter().any(|item| wanted.contains(item))
        }
        (a, b) => a.scalar_text() == b.scalar_text(),
    }
}

/// Score `extracted` against `reference`
pub fn evaluate(reference: &Profile, extracted: &Profile) -> EvaluationResult {
    let mut dimension_accuracy = BTreeMap::new();
    let mut fields = Vec::new();
    let mut total_fields = 0;
    let mut correct_fields = 0;

    for dim in SCHEMA {
        let mut total = 0;
        let mut correct = 0;

        for spec in dim.fields {
            let Some(expected) = reference
                .get(dim.name, spec.name)
                .filter(|fv| !fv.is_empty())
                .and_then(|fv| fv.value.as_ref())
            else {
                continue;
            };

            let hit = extracted
                .get(dim.name, spec.name)
                .and_then(|fv| fv.value.as_ref())
                .map_or(false, |actual| values_match(expected, actual));

            total += 1;
            if hit {
                correct += 1;
            }
            fields.push(FieldGrade {
                dimension: dim.name.to_string(),
                field: spec.name.to_string(),
                correct: hit,
            });
        }

        dimension_accuracy.insert(dim.name.to_string(), ratio(correct, total));
        total_fields += total;
        correct_fields += correct;
    }

    EvaluationResult {
        overall_accuracy: ratio(correct_fields, total_fields),
        dimension_accuracy,
        total_fields,
        correct_fields,
        fields,
    }
}

/// Score raw JSON documents.
///
/// Both sides go through the lenient candidate parser; a malformed
/// reference leaf is simply not gradable.
pub fn evaluate_json(reference: &Value, extracted: &Value) -> EvaluationResult {
    let reference = parse_candidate(reference);
    if !reference.rejected.is_empty() {
        tracing::debug!(
            "Skipping {} malformed reference fields",
            reference.rejected.len()
        );
    }
    let extracted = parse_candidate(extracted);
    evaluate(&reference.profile, &extracted.profile)
}
