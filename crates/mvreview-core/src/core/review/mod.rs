//! Video Review
//!
//! Per-video review: the shared signal context, the rule set, rule outcomes
//! and the engine that runs them.

pub mod context;
pub mod engine;
pub mod rules;
pub mod violation;

// Re-export main types
pub use context::{
    AudioSample, ExtractionOptions, FingerprintMatch, Frame, LoudnessSegment, MediaSignals,
    MediaSource, ReviewContext,
};
pub use engine::{PassedRule, ReviewEngine, ReviewResult};
pub use rules::{build_rules, ContentCategory, ReviewRule, Rule, RuleServices};
pub use violation::{Details, RuleError, RuleErrorKind, RuleOutcome, Violation};
