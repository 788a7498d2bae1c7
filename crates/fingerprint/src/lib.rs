//! Fingerprint Engine - response classification
//!
//! This crate provides:
//! - the well-known port table used as a default service guess
//! - ordered, first-match regex matching of captured responses
//! - per-step condition evaluation (AND/OR, reverse, dependent logging)

mod conditions;
mod matcher;
mod service_detector;

pub use conditions::{
    apply_extra_data, evaluate_conditions, replace_dependent_response, Condition,
    ConditionMatch, ConditionOutcome, ConditionResult, ConditionType, Conditions,
    ServiceSummary, StepMethod, StepOutcome, StepResponse, SubStep, OPEN_PORT,
};
pub use matcher::{match_regex, CompiledMatcher, MatcherSet};
pub use service_detector::service_for_port;
