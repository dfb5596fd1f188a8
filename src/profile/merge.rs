//! Confidence-based profile merging
//!
//! Reconciles a stored profile with a candidate fragment, field by field:
//!
//! 1. A candidate field without a value carries no evidence: keep the old field.
//! 2. An old field without a value adopts the candidate field.
//! 3. Two lists are unioned; the higher confidence (strictly) wins the metadata.
//! 4. Otherwise the candidate replaces the old field only when its confidence
//!    is strictly greater. Ties keep the existing value.
//!
//! Merging is pure: inputs are borrowed, the result is a fresh profile.

use super::candidate::{parse_candidate, LeafRejection};
use super::document::Profile;
use super::field::{FieldData, FieldValue};
use super::schema::SCHEMA;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Result of merging a raw candidate fragment
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub profile: Profile,
    pub rejected: Vec<LeafRejection>,
    /// Number of fields whose stored value changed
    pub changed: usize,
}

/// Merge a typed candidate into `old`.
pub fn merge(old: &Profile, candidate: &Profile) -> Profile {
    merge_inner(old, candidate, None).0
}

/// Like [`merge`], stamping adopted fields that lack `last_updated` with `now`.
pub fn merge_at(old: &Profile, candidate: &Profile, now: DateTime<Utc>) -> Profile {
    merge_inner(old, candidate, Some(now)).0
}

/// Parse a raw candidate leniently, then merge it. Never fails: malformed
/// leaves are reported in `rejected` and skipped.
pub fn merge_candidate(old: &Profile, candidate: &Value, now: Option<DateTime<Utc>>) -> MergeOutcome {
    let parsed = parse_candidate(candidate);
    let (profile, changed, zero_confidence) = merge_inner(old, &parsed.profile, now);

    let mut rejected = parsed.rejected;
    rejected.extend(zero_confidence);
    for r in &rejected {
        tracing::debug!("Rejected candidate leaf {}.{}: {}", r.dimension, r.field, r.reason);
    }
    tracing::trace!("Merged candidate: {} changed, {} rejected", changed, rejected.len());

    MergeOutcome {
        profile,
        rejected,
        changed,
    }
}

fn merge_inner(
    old: &Profile,
    candidate: &Profile,
    now: Option<DateTime<Utc>>,
) -> (Profile, usize, Vec<LeafRejection>) {
    let mut merged = old.clone();
    let mut changed = 0;
    let mut rejected = Vec::new();

    for d in SCHEMA {
        for f in d.fields {
            let Some(incoming) = candidate.get(d.name, f.name) else {
                continue;
            };
            if incoming.value.is_none() {
                continue;
            }
            if incoming.confidence <= 0.0 {
                rejected.push(LeafRejection {
                    dimension: d.name.to_string(),
                    field: f.name.to_string(),
                    reason: "value has zero confidence".to_string(),
                });
                continue;
            }
            let Some(slot) = merged.get_mut(d.name, f.name) else {
                continue;
            };
            let next = merge_field(slot, incoming, now);
            if next != *slot {
                *slot = next;
                changed += 1;
            }
        }
    }

    (merged, changed, rejected)
}

/// Resolve a single leaf. `incoming` is known to hold a value with
/// confidence > 0.
fn merge_field(old: &FieldValue, incoming: &FieldValue, now: Option<DateTime<Utc>>) -> FieldValue {
    let stamp = |mut field: FieldValue| {
        if field.last_updated.is_none() {
            field.last_updated = now;
        }
        field
    };

    if old.value.is_none() {
        return stamp(incoming.clone());
    }

    let candidate_wins = incoming.confidence > old.confidence;

    if let (Some(FieldData::List(old_items)), Some(FieldData::List(new_items))) =
        (&old.value, &incoming.value)
    {
        let union = union_items(old_items, new_items);
        let metadata = if candidate_wins { stamp(incoming.clone()) } else { old.clone() };
        return FieldValue {
            value: Some(FieldData::List(union)),
            confidence: metadata.confidence,
            last_updated: metadata.last_updated,
        };
    }

    if candidate_wins {
        stamp(incoming.clone())
    } else {
        old.clone()
    }
}

/// Old items in order, then unseen new items; duplicates collapse to the
/// first occurrence.
fn union_items(old: &[String], new: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(old.len() + new.len());
    for item in old.iter().chain(new) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
