//! Cross-agent validation
//!
//! Agents never see each other's output. Trust is assigned afterwards by
//! comparing every pair of usable runs on two axes: how similar their
//! stage-by-stage narratives are and how much their final findings agree.

pub mod cross_validator;
pub mod similarity;

pub use cross_validator::{
    CrossValidationError, CrossValidationResult, CrossValidator, PairScore, ValidationVerdict,
};
