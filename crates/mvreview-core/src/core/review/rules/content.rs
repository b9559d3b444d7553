//! Content Rule
//!
//! Classifies a handful of sampled frames with a vision-language model and
//! flags categories that are confidently detected on at least one frame.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::ReviewRule;
use crate::core::config::ContentRuleConfig;
use crate::core::review::context::{Frame, ReviewContext};
use crate::core::review::violation::{Details, RuleError, RuleErrorKind, RuleOutcome, Violation};
use crate::core::services::VisionClassifier;
use crate::core::{Confidence, RuleId, TimeSec};

pub const RULE_ID: RuleId = 4;
pub const RULE_NAME: &str = "content";

// =============================================================================
// Categories
// =============================================================================

/// Content categories the classifier is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    /// Revealing clothing or nudity
    Exposure,
    /// Violence, gore or otherwise unsuitable imagery
    Inappropriate,
    /// Scenery only, no performer on screen
    LandscapeOnly,
    /// Product placement, logos or promotional overlays
    Advertisement,
    /// Drug use or paraphernalia
    DrugUse,
}

impl ContentCategory {
    pub fn all() -> &'static [ContentCategory] {
        &[
            ContentCategory::Exposure,
            ContentCategory::Inappropriate,
            ContentCategory::LandscapeOnly,
            ContentCategory::Advertisement,
            ContentCategory::DrugUse,
        ]
    }

    /// Key used in classifier prompts, responses and reports
    pub fn key(&self) -> &'static str {
        match self {
            ContentCategory::Exposure => "exposure",
            ContentCategory::Inappropriate => "inappropriate",
            ContentCategory::LandscapeOnly => "landscape_only",
            ContentCategory::Advertisement => "advertisement",
            ContentCategory::DrugUse => "drug_use",
        }
    }

    /// Parses a response key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.key() == key)
    }

    /// What the classifier should look for
    pub fn prompt_hint(&self) -> &'static str {
        match self {
            ContentCategory::Exposure => "revealing clothing, exposed skin or nudity",
            ContentCategory::Inappropriate => "violence, gore, weapons or disturbing imagery",
            ContentCategory::LandscapeOnly => {
                "only scenery or landscape with no person performing on screen"
            }
            ContentCategory::Advertisement => {
                "product placement, brand logos, QR codes or promotional text"
            }
            ContentCategory::DrugUse => "drug use, drug paraphernalia or smoking",
        }
    }

    /// Number used to select the category on the command line (4-7)
    pub fn report_number(&self) -> RuleId {
        match self {
            ContentCategory::Exposure | ContentCategory::Inappropriate => 4,
            ContentCategory::LandscapeOnly => 5,
            ContentCategory::Advertisement => 6,
            ContentCategory::DrugUse => 7,
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Picks up to `max` frames spread evenly across `frames`, keeping both ends.
pub fn select_frames(frames: &[Frame], max: usize) -> Vec<&Frame> {
    if max == 0 || frames.is_empty() {
        return Vec::new();
    }
    if frames.len() <= max {
        return frames.iter().collect();
    }
    if max == 1 {
        return vec![&frames[frames.len() / 2]];
    }

    let last = frames.len() - 1;
    let mut picked: Vec<usize> = (0..max)
        .map(|i| (i * last + (max - 1) / 2) / (max - 1))
        .collect();
    picked.dedup();
    picked.into_iter().map(|i| &frames[i]).collect()
}

// =============================================================================
// Rule
// =============================================================================

#[derive(Debug, Default)]
struct CategoryHits {
    max_confidence: Confidence,
    frames: Vec<(TimeSec, Confidence)>,
}

/// Vision-language content classification
pub struct ContentRule {
    config: ContentRuleConfig,
    classifier: Option<Arc<dyn VisionClassifier>>,
}

impl ContentRule {
    pub fn new(config: ContentRuleConfig, classifier: Arc<dyn VisionClassifier>) -> Self {
        Self {
            config,
            classifier: Some(classifier),
        }
    }

    /// A rule that is switched off and never consulted
    pub fn disabled() -> Self {
        Self {
            config: ContentRuleConfig {
                enabled: false,
                ..Default::default()
            },
            classifier: None,
        }
    }

    fn error(&self, kind: RuleErrorKind, message: impl Into<String>) -> RuleOutcome {
        RuleOutcome::Error(RuleError::new(RULE_ID, RULE_NAME, kind, message))
    }
}

#[async_trait]
impl ReviewRule for ContentRule {
    fn id(&self) -> RuleId {
        RULE_ID
    }

    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn description(&self) -> &'static str {
        "Classifies sampled frames for prohibited visual content"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn check(&self, ctx: &ReviewContext) -> RuleOutcome {
        let Some(classifier) = &self.classifier else {
            return self.error(RuleErrorKind::Internal, "no vision classifier configured");
        };

        let selected = select_frames(ctx.frames(), self.config.max_frames);
        if selected.is_empty() {
            let reason = ctx.frame_error().unwrap_or("no frames sampled");
            return self.error(RuleErrorKind::MissingSignal, reason);
        }

        let categories = &self.config.categories;
        let results = join_all(
            selected
                .iter()
                .map(|frame| classifier.classify(frame, categories)),
        )
        .await;

        let threshold = self.config.confidence_threshold;
        let mut hits: BTreeMap<ContentCategory, CategoryHits> = BTreeMap::new();
        let mut classified = 0usize;
        let mut last_error = None;

        for (frame, result) in selected.iter().zip(results) {
            let classification = match result {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        "Frame at {:.2}s of {} could not be classified: {}",
                        frame.timestamp_sec,
                        ctx.path().display(),
                        e
                    );
                    last_error = Some(e);
                    continue;
                }
            };
            classified += 1;

            for (category, score) in classification {
                if !categories.contains(&category) {
                    continue;
                }
                if score.detected && score.confidence >= threshold {
                    let entry = hits.entry(category).or_default();
                    entry.max_confidence = entry.max_confidence.max(score.confidence);
                    entry.frames.push((frame.timestamp_sec, score.confidence));
                }
            }
        }

        if classified == 0 {
            return match last_error {
                Some(e) => RuleOutcome::Error(RuleError::from_core(RULE_ID, RULE_NAME, &e)),
                None => self.error(RuleErrorKind::Internal, "no frame was classified"),
            };
        }

        debug!(
            "{} of {} frames classified for {}",
            classified,
            selected.len(),
            ctx.path().display()
        );

        if hits.is_empty() {
            let mut details = Details::new();
            details.insert("frames_classified".into(), json!(classified));
            details.insert("frames_selected".into(), json!(selected.len()));
            return RuleOutcome::Pass(details);
        }

        let confidence = hits
            .values()
            .map(|h| h.max_confidence)
            .fold(0.0_f64, f64::max);
        let names: Vec<&str> = hits.keys().map(|c| c.key()).collect();
        let triggered: Vec<serde_json::Value> = hits
            .iter()
            .map(|(category, h)| {
                json!({
                    "category": category.key(),
                    "report_number": category.report_number(),
                    "max_confidence": h.max_confidence,
                    "frames": h.frames.iter().map(|(ts, conf)| json!({
                        "timestamp_sec": ts,
                        "confidence": conf,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();

        RuleOutcome::Violation(
            Violation::new(
                RULE_ID,
                RULE_NAME,
                format!("Prohibited content detected: {}", names.join(", ")),
                confidence,
            )
            .with_detail("categories", json!(triggered))
            .with_detail("frames_classified", classified)
            .with_detail("threshold", threshold),
        )
    }
}
