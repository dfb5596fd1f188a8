//! Extraction accuracy against a reference profile
//!
//! Used by test and training harnesses to score how much of a known profile
//! an extractor recovered.

pub mod evaluator;

pub use evaluator::{evaluate, evaluate_json, EvaluationResult, FieldGrade};
