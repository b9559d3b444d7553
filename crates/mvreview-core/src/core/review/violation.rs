//! Rule Outcomes
//!
//! Violations, rule errors and the tri-state outcome every rule returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{clamp_confidence, Confidence, CoreError, RuleId};

/// Named detail values attached to outcomes, kept sorted for stable output
pub type Details = BTreeMap<String, Value>;

// =============================================================================
// Violation
// =============================================================================

/// A rule's positive finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub description: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub details: Details,
}

impl Violation {
    /// Creates a violation, clamping confidence into `[0, 1]`
    pub fn new(
        rule_id: RuleId,
        rule_name: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            rule_id,
            rule_name: rule_name.into(),
            description: description.into(),
            confidence: clamp_confidence(confidence),
            details: Details::new(),
        }
    }

    /// Adds one detail value
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Merges a detail map
    pub fn with_details(mut self, details: Details) -> Self {
        self.details.extend(details);
        self
    }
}

// =============================================================================
// Rule Errors
// =============================================================================

/// Why a rule could not reach a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleErrorKind {
    ServiceUnavailable,
    RateLimited,
    Timeout,
    MissingSignal,
    VideoProcessing,
    InvalidResponse,
    Internal,
}

impl RuleErrorKind {
    /// Maps a core error onto the kind recorded in reports
    pub fn from_error(err: &CoreError) -> Self {
        match err {
            CoreError::ServiceUnavailable { .. } | CoreError::ServiceRequestFailed { .. } => {
                RuleErrorKind::ServiceUnavailable
            }
            CoreError::RateLimited { .. } => RuleErrorKind::RateLimited,
            CoreError::Timeout(_) => RuleErrorKind::Timeout,
            CoreError::InvalidResponse { .. } => RuleErrorKind::InvalidResponse,
            CoreError::VideoProcessing { .. }
            | CoreError::MediaTool(_)
            | CoreError::FileNotFound(_) => RuleErrorKind::VideoProcessing,
            _ => RuleErrorKind::Internal,
        }
    }
}

/// A rule failure, recorded instead of propagated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleError {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub kind: RuleErrorKind,
    pub message: String,
}

impl RuleError {
    pub fn new(
        rule_id: RuleId,
        rule_name: impl Into<String>,
        kind: RuleErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id,
            rule_name: rule_name.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wraps a core error raised inside a rule
    pub fn from_core(rule_id: RuleId, rule_name: impl Into<String>, err: &CoreError) -> Self {
        Self::new(
            rule_id,
            rule_name,
            RuleErrorKind::from_error(err),
            err.to_string(),
        )
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Tri-state result of one rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Pass(Details),
    Violation(Violation),
    Error(RuleError),
}

impl RuleOutcome {
    /// Pass with no details
    pub fn pass() -> Self {
        RuleOutcome::Pass(Details::new())
    }

    /// Pass with a single detail
    pub fn pass_with(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut details = Details::new();
        details.insert(key.into(), value.into());
        RuleOutcome::Pass(details)
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, RuleOutcome::Pass(_))
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, RuleOutcome::Violation(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RuleOutcome::Error(_))
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            RuleOutcome::Pass(_) => "pass",
            RuleOutcome::Violation(_) => "violation",
            RuleOutcome::Error(_) => "error",
        }
    }
}
