//! Review Engine
//!
//! Builds a video's review context, runs the enabled rules concurrently with
//! failure isolation, and assembles the per-video verdict.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::context::{ExtractionOptions, MediaSource, ReviewContext};
use super::rules::{build_rules, ReviewRule, Rule, RuleServices};
use super::violation::{Details, RuleError, RuleErrorKind, RuleOutcome, Violation};
use crate::core::batch::ActionRecord;
use crate::core::config::ReviewConfig;
use crate::core::{CoreResult, RuleId};

/// Default per-rule time budget
pub const DEFAULT_RULE_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Review Result
// =============================================================================

/// A rule that ran and found nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassedRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    #[serde(default)]
    pub details: Details,
}

/// Verdict for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    #[serde(with = "crate::core::fs::lossy_path")]
    pub video_path: PathBuf,
    /// True iff at least one rule reported a violation
    pub is_violation: bool,
    /// Ordered by rule id
    pub violations: Vec<Violation>,
    /// Ordered by rule id
    pub errors: Vec<RuleError>,
    /// Ordered by rule id
    pub passed: Vec<PassedRule>,
    /// Disabled rules
    #[serde(default)]
    pub skipped_rules: Vec<RuleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,
    pub reviewed_at: chrono::DateTime<chrono::Utc>,
    pub review_duration_ms: u64,
}

impl ReviewResult {
    /// Assembles a result from rule outcomes in any order
    pub fn from_outcomes(
        video_path: impl Into<PathBuf>,
        mut outcomes: Vec<(RuleId, String, RuleOutcome)>,
        skipped_rules: Vec<RuleId>,
        duration: Duration,
    ) -> Self {
        outcomes.sort_by_key(|(id, _, _)| *id);

        let mut violations = Vec::new();
        let mut errors = Vec::new();
        let mut passed = Vec::new();

        for (rule_id, rule_name, outcome) in outcomes {
            match outcome {
                RuleOutcome::Pass(details) => passed.push(PassedRule {
                    rule_id,
                    rule_name,
                    details,
                }),
                RuleOutcome::Violation(v) => violations.push(v),
                RuleOutcome::Error(e) => errors.push(e),
            }
        }

        Self {
            video_path: video_path.into(),
            is_violation: !violations.is_empty(),
            violations,
            errors,
            passed,
            skipped_rules,
            action: None,
            reviewed_at: chrono::Utc::now(),
            review_duration_ms: duration.as_millis() as u64,
        }
    }

    /// Whether any rule failed to reach a verdict
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Ids of rules that reported violations
    pub fn violated_rules(&self) -> Vec<RuleId> {
        self.violations.iter().map(|v| v.rule_id).collect()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let verdict = if self.is_violation {
            "VIOLATION"
        } else if self.has_errors() {
            "INCOMPLETE"
        } else {
            "PASSED"
        };
        format!(
            "{}: {} ({} violation(s), {} error(s), {} passed, {}ms)",
            self.video_path.display(),
            verdict,
            self.violations.len(),
            self.errors.len(),
            self.passed.len(),
            self.review_duration_ms
        )
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Runs the configured rules against videos
pub struct ReviewEngine {
    rules: Vec<Arc<Rule>>,
    media: Arc<dyn MediaSource>,
    rule_timeout: Duration,
}

impl ReviewEngine {
    /// Creates an engine over an explicit rule set
    pub fn new(rules: Vec<Rule>, media: Arc<dyn MediaSource>) -> Self {
        let mut rules: Vec<Arc<Rule>> = rules.into_iter().map(Arc::new).collect();
        rules.sort_by_key(|r| r.id());
        Self {
            rules,
            media,
            rule_timeout: DEFAULT_RULE_TIMEOUT,
        }
    }

    /// Creates an engine from configuration and service adapters
    pub fn from_config(
        config: &ReviewConfig,
        services: &RuleServices,
        media: Arc<dyn MediaSource>,
    ) -> CoreResult<Self> {
        let rules = build_rules(config, services)?;
        Ok(Self::new(rules, media)
            .with_rule_timeout(Duration::from_millis(config.batch.rule_timeout_ms)))
    }

    /// Sets the time budget for a single rule
    pub fn with_rule_timeout(mut self, timeout: Duration) -> Self {
        self.rule_timeout = timeout;
        self
    }

    /// Names of enabled rules, in id order
    pub fn enabled_rule_names(&self) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| r.is_enabled())
            .map(|r| r.name())
            .collect()
    }

    /// Signals the enabled rules need
    pub fn extraction_options(&self) -> ExtractionOptions {
        let enabled = |m: fn(&Rule) -> bool| {
            self.rules
                .iter()
                .any(|r| r.is_enabled() && m(r.as_ref()))
        };
        let content = enabled(|r| matches!(r, Rule::Content(_)));
        ExtractionOptions {
            frames: content || enabled(|r| matches!(r, Rule::Aspect(_))),
            frame_images: content,
            loudness: enabled(|r| matches!(r, Rule::Volume(_))),
            fingerprint: enabled(|r| matches!(r, Rule::Metadata(_))),
        }
    }

    /// Reviews one video. Never fails: extraction and rule failures are
    /// recorded on the result.
    pub async fn review(&self, path: &Path) -> ReviewResult {
        let start = Instant::now();
        info!("Reviewing {}", path.display());

        let options = self.extraction_options();
        let result = match self.media.extract(path, &options).await {
            Ok(signals) => {
                let ctx = Arc::new(ReviewContext::from_signals(path, signals));
                self.run_rules(ctx, start).await
            }
            Err(e) => {
                warn!("Could not build review context for {}: {}", path.display(), e);
                self.errored_result(
                    path,
                    RuleErrorKind::VideoProcessing,
                    &e.to_string(),
                    start.elapsed(),
                )
            }
        };

        info!("{}", result.summary());
        result
    }

    /// Runs the enabled rules over an already built context
    pub async fn review_context(&self, ctx: Arc<ReviewContext>) -> ReviewResult {
        self.run_rules(ctx, Instant::now()).await
    }

    /// A result in which every enabled rule failed with `kind`
    pub fn errored_result(
        &self,
        path: &Path,
        kind: RuleErrorKind,
        message: &str,
        elapsed: Duration,
    ) -> ReviewResult {
        let outcomes = self
            .rules
            .iter()
            .filter(|r| r.is_enabled())
            .map(|r| {
                let err = RuleError::new(r.id(), r.name(), kind, message);
                (r.id(), r.name().to_string(), RuleOutcome::Error(err))
            })
            .collect();
        ReviewResult::from_outcomes(path, outcomes, self.skipped(), elapsed)
    }

    fn skipped(&self) -> Vec<RuleId> {
        self.rules
            .iter()
            .filter(|r| !r.is_enabled())
            .map(|r| r.id())
            .collect()
    }

    async fn run_rules(&self, ctx: Arc<ReviewContext>, start: Instant) -> ReviewResult {
        let enabled: Vec<Arc<Rule>> = self
            .rules
            .iter()
            .filter(|r| r.is_enabled())
            .cloned()
            .collect();

        let handles = enabled.iter().map(|rule| {
            let rule = Arc::clone(rule);
            let ctx = Arc::clone(&ctx);
            let budget = self.rule_timeout;
            tokio::spawn(async move {
                let rule_start = Instant::now();
                let outcome = tokio::time::timeout(budget, rule.check(&ctx)).await;
                (outcome, rule_start.elapsed())
            })
        });
        let joined = join_all(handles).await;

        let outcomes = enabled
            .iter()
            .zip(joined)
            .map(|(rule, joined)| {
                let outcome = match joined {
                    Ok((Ok(outcome), elapsed)) => {
                        debug!(
                            "Rule '{}' on {}: {} in {}ms",
                            rule.name(),
                            ctx.path().display(),
                            outcome.label(),
                            elapsed.as_millis()
                        );
                        outcome
                    }
                    Ok((Err(_), _)) => {
                        warn!(
                            "Rule '{}' timed out after {}ms on {}",
                            rule.name(),
                            self.rule_timeout.as_millis(),
                            ctx.path().display()
                        );
                        RuleOutcome::Error(RuleError::new(
                            rule.id(),
                            rule.name(),
                            RuleErrorKind::Timeout,
                            format!("rule exceeded {}ms", self.rule_timeout.as_millis()),
                        ))
                    }
                    Err(join_err) => {
                        warn!("Rule '{}' failed: {}", rule.name(), join_err);
                        RuleOutcome::Error(RuleError::new(
                            rule.id(),
                            rule.name(),
                            RuleErrorKind::Internal,
                            format!("rule task failed: {}", join_err),
                        ))
                    }
                };
                if let RuleOutcome::Error(e) = &outcome {
                    if e.kind != RuleErrorKind::Timeout && e.kind != RuleErrorKind::Internal {
                        warn!("Rule '{}' errored: {}", rule.name(), e.message);
                    }
                }
                (rule.id(), rule.name().to_string(), outcome)
            })
            .collect();

        ReviewResult::from_outcomes(ctx.path(), outcomes, self.skipped(), start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::core::config::{AspectRuleConfig, ContentRuleConfig, VolumeRuleConfig};
    use crate::core::review::context::{Frame, LoudnessSegment, MediaSignals};
    use crate::core::review::rules::{AspectRule, ContentCategory, ContentRule, VolumeRule};
    use crate::core::services::{Classification, VisionClassifier};
    use crate::core::CoreError;

    struct SlowClassifier;

    #[async_trait]
    impl VisionClassifier for SlowClassifier {
        fn service_name(&self) -> &str {
            "slow"
        }

        async fn classify(
            &self,
            _frame: &Frame,
            _categories: &[ContentCategory],
        ) -> CoreResult<Classification> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Classification::new())
        }
    }

    struct PanickingClassifier;

    #[async_trait]
    impl VisionClassifier for PanickingClassifier {
        fn service_name(&self) -> &str {
            "panicking"
        }

        async fn classify(
            &self,
            _frame: &Frame,
            _categories: &[ContentCategory],
        ) -> CoreResult<Classification> {
            panic!("classifier bug");
        }
    }

    fn content_engine(classifier: Arc<dyn VisionClassifier>) -> ReviewEngine {
        ReviewEngine::new(
            vec![
                Rule::Content(ContentRule::new(ContentRuleConfig::default(), classifier)),
                Rule::Volume(VolumeRule::new(VolumeRuleConfig::default())),
            ],
            Arc::new(CannedMedia {
                signals: HashMap::new(),
            }),
        )
        .with_rule_timeout(Duration::from_millis(50))
    }

    fn content_ctx() -> Arc<ReviewContext> {
        Arc::new(
            ReviewContext::new("c.mp4")
                .with_frames(vec![Frame::new(1.0, 4, 2, vec![200; 8])])
                .with_loudness(loud_jump()),
        )
    }

    /// Media source serving canned signals per file name
    struct CannedMedia {
        signals: HashMap<String, MediaSignals>,
    }

    #[async_trait]
    impl MediaSource for CannedMedia {
        async fn extract(
            &self,
            path: &Path,
            _options: &ExtractionOptions,
        ) -> CoreResult<MediaSignals> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.signals
                .get(&name)
                .cloned()
                .ok_or_else(|| CoreError::VideoProcessing {
                    path: path.to_path_buf(),
                    reason: "unreadable".into(),
                })
        }
    }

    fn letterboxed() -> Frame {
        let (w, h) = (100usize, 100usize);
        let mut luma = vec![200u8; w * h];
        for y in (0..25).chain(75..100) {
            for x in 0..w {
                luma[y * w + x] = 0;
            }
        }
        Frame::new(1.0, w as u32, h as u32, luma)
    }

    fn loud_jump() -> Vec<LoudnessSegment> {
        [-30.0, -29.0, -10.0]
            .iter()
            .enumerate()
            .map(|(i, &db)| LoudnessSegment {
                start_sec: i as f64,
                duration_sec: 1.0,
                rms_db: db,
            })
            .collect()
    }

    fn engine(signals: HashMap<String, MediaSignals>) -> ReviewEngine {
        ReviewEngine::new(
            vec![
                Rule::Volume(VolumeRule::new(VolumeRuleConfig::default())),
                Rule::Aspect(AspectRule::new(AspectRuleConfig::default())),
            ],
            Arc::new(CannedMedia { signals }),
        )
    }

    #[tokio::test]
    async fn test_violations_sorted_by_rule_id() {
        let mut signals = HashMap::new();
        signals.insert(
            "bad.mp4".to_string(),
            MediaSignals {
                frames: vec![letterboxed()],
                loudness: loud_jump(),
                ..Default::default()
            },
        );

        let result = engine(signals).review(Path::new("/videos/bad.mp4")).await;
        assert!(result.is_violation);
        assert_eq!(result.violated_rules(), vec![2, 3]);
        assert!(result.errors.is_empty());
        assert_eq!(result.video_path, PathBuf::from("/videos/bad.mp4"));
    }

    #[tokio::test]
    async fn test_clean_video_passes() {
        let mut signals = HashMap::new();
        signals.insert(
            "ok.mp4".to_string(),
            MediaSignals {
                frames: vec![Frame::new(1.0, 4, 2, vec![200; 8])],
                ..Default::default()
            },
        );

        let result = engine(signals).review(Path::new("ok.mp4")).await;
        assert!(!result.is_violation);
        assert!(result.violations.is_empty());
        let passed: Vec<RuleId> = result.passed.iter().map(|p| p.rule_id).collect();
        assert_eq!(passed, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_extraction_failure_errors_every_enabled_rule() {
        let result = engine(HashMap::new()).review(Path::new("broken.mp4")).await;
        assert!(!result.is_violation);
        assert_eq!(result.errors.len(), 2);
        assert!(result
            .errors
            .iter()
            .all(|e| e.kind == RuleErrorKind::VideoProcessing));
        assert_eq!(result.errors[0].rule_id, 2);
    }

    #[tokio::test]
    async fn test_rule_error_does_not_hide_violation() {
        let mut signals = HashMap::new();
        signals.insert(
            "mixed.mp4".to_string(),
            MediaSignals {
                frame_error: Some("decode failed".into()),
                loudness: loud_jump(),
                ..Default::default()
            },
        );

        let result = engine(signals).review(Path::new("mixed.mp4")).await;
        assert!(result.is_violation);
        assert_eq!(result.violated_rules(), vec![3]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, RuleErrorKind::MissingSignal);
    }

    #[tokio::test]
    async fn test_disabled_rules_are_skipped() {
        let disabled = AspectRuleConfig {
            enabled: false,
            ..Default::default()
        };
        let engine = ReviewEngine::new(
            vec![
                Rule::Aspect(AspectRule::new(disabled)),
                Rule::Volume(VolumeRule::new(VolumeRuleConfig::default())),
            ],
            Arc::new(CannedMedia {
                signals: HashMap::new(),
            }),
        );

        let result = engine.review(Path::new("missing.mp4")).await;
        assert_eq!(result.skipped_rules, vec![2]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].rule_id, 3);

        let options = engine.extraction_options();
        assert!(!options.frames);
        assert!(options.loudness);
        assert!(!options.fingerprint);
    }

    #[tokio::test]
    async fn test_slow_rule_times_out_without_blocking_others() {
        let result = content_engine(Arc::new(SlowClassifier))
            .review_context(content_ctx())
            .await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].rule_id, 4);
        assert_eq!(result.errors[0].kind, RuleErrorKind::Timeout);
        assert_eq!(result.violated_rules(), vec![3]);
    }

    #[tokio::test]
    async fn test_panicking_rule_becomes_error() {
        let result = content_engine(Arc::new(PanickingClassifier))
            .review_context(content_ctx())
            .await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, RuleErrorKind::Internal);
        assert!(result.is_violation);
    }

    #[test]
    fn test_from_outcomes_orders_and_flags() {
        let outcomes = vec![
            (
                3,
                "volume".to_string(),
                RuleOutcome::Violation(Violation::new(3, "volume", "v", 0.5)),
            ),
            (2, "aspect".to_string(), RuleOutcome::pass()),
            (
                1,
                "metadata".to_string(),
                RuleOutcome::Violation(Violation::new(1, "metadata", "m", 0.9)),
            ),
        ];
        let result =
            ReviewResult::from_outcomes("x.mp4", outcomes, vec![4], Duration::from_millis(5));
        assert!(result.is_violation);
        assert_eq!(result.violated_rules(), vec![1, 3]);
        assert_eq!(result.passed[0].rule_id, 2);
        assert_eq!(result.review_duration_ms, 5);
        assert!(result.summary().contains("VIOLATION"));
    }
}
