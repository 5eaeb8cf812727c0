//! Rule evaluation and confidence scoring.
//!
//! [`RuleEvaluator`] turns a location into a [`ValidationRuleOutcome`]; [`ConfidenceScorer`]
//! turns the outcome into a 0-100 score and a [`ValidationStatus`](crate::types::ValidationStatus).
//! Both are pure functions of their input.

pub mod bounds;
pub mod patterns;
pub mod rules;
pub mod scorer;

pub use rules::{GeocodingConfidence, RuleEvaluator, ValidationRuleOutcome};
pub use scorer::{
    ConfidenceScorer, LocationScore, Penalty, RejectionReason, VERIFIED_THRESHOLD,
};
