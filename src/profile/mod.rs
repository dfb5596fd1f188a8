//! Confidence-scored user profiles
//!
//! A profile is a fixed tree of dimensions and fields (see [`schema`]).
//! Candidate fragments from an extractor are parsed leniently
//! ([`candidate`]) and reconciled with the stored profile by the merge
//! engine ([`merge`]).

pub mod candidate;
pub mod document;
pub mod field;
pub mod merge;
pub mod migrate;
pub mod schema;

pub use candidate::{parse_candidate, LeafRejection, ParsedCandidate};
pub use document::Profile;
pub use field::{FieldData, FieldValue};
pub use merge::{merge, merge_at, merge_candidate, MergeOutcome};
pub use schema::{DimensionSpec, FieldKind, FieldSpec, SCHEMA};
