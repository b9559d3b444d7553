//! Aspect Rule
//!
//! Flags portrait videos and videos whose picture is surrounded by black
//! borders (letterbox or pillarbox) covering too much of the frame.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::ReviewRule;
use crate::core::config::AspectRuleConfig;
use crate::core::review::context::{Frame, ReviewContext};
use crate::core::review::violation::{Details, RuleError, RuleErrorKind, RuleOutcome, Violation};
use crate::core::RuleId;

pub const RULE_ID: RuleId = 2;
pub const RULE_NAME: &str = "aspect";

/// Black border depth on each edge as a fraction of the frame dimension
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BorderRatios {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl BorderRatios {
    pub fn vertical_total(&self) -> f64 {
        self.top + self.bottom
    }

    pub fn horizontal_total(&self) -> f64 {
        self.left + self.right
    }

    fn exceeded(&self, threshold: f64) -> Vec<&'static str> {
        let mut exceeded = Vec::new();
        if self.vertical_total() >= threshold {
            exceeded.push("vertical");
        }
        if self.horizontal_total() >= threshold {
            exceeded.push("horizontal");
        }
        exceeded
    }
}

/// Measures black borders on one frame.
///
/// Each edge is scanned inward line by line up to `max_depth_fraction` of the
/// dimension; the border ends at the first line whose mean luma exceeds
/// `luma_threshold`.
pub fn measure_borders(frame: &Frame, luma_threshold: u8, max_depth_fraction: f64) -> BorderRatios {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let threshold = luma_threshold as f64;
    let max_rows = (h as f64 * max_depth_fraction).floor() as usize;
    let max_cols = (w as f64 * max_depth_fraction).floor() as usize;

    let depth = |limit: usize, mean_at: &dyn Fn(usize) -> f64| -> usize {
        (0..limit).find(|&i| mean_at(i) > threshold).unwrap_or(limit)
    };

    let top = depth(max_rows, &|i| frame.row_mean(i));
    let bottom = depth(max_rows, &|i| frame.row_mean(h - 1 - i));
    let left = depth(max_cols, &|i| frame.column_mean(i));
    let right = depth(max_cols, &|i| frame.column_mean(w - 1 - i));

    BorderRatios {
        top: top as f64 / h as f64,
        bottom: bottom as f64 / h as f64,
        left: left as f64 / w as f64,
        right: right as f64 / w as f64,
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Orientation and border detection
pub struct AspectRule {
    config: AspectRuleConfig,
}

impl AspectRule {
    pub fn new(config: AspectRuleConfig) -> Self {
        Self { config }
    }

    fn error(&self, kind: RuleErrorKind, message: impl Into<String>) -> RuleOutcome {
        RuleOutcome::Error(RuleError::new(RULE_ID, RULE_NAME, kind, message))
    }

    fn check_portrait(&self, frames: &[Frame]) -> Option<RuleOutcome> {
        let portrait: Vec<&Frame> = frames.iter().filter(|f| f.is_portrait()).collect();
        let first = portrait.first()?;

        let violation = Violation::new(
            RULE_ID,
            RULE_NAME,
            format!("Portrait video ({}x{})", first.width, first.height),
            portrait.len() as f64 / frames.len() as f64,
        )
        .with_detail("type", "portrait")
        .with_detail("width", first.width)
        .with_detail("height", first.height)
        .with_detail(
            "aspect_ratio",
            round4(first.width as f64 / first.height as f64),
        )
        .with_detail("portrait_frames", portrait.len());

        Some(RuleOutcome::Violation(violation))
    }

    fn check_borders(&self, frames: &[Frame]) -> RuleOutcome {
        let measured: Vec<BorderRatios> = frames
            .iter()
            .filter(|f| f.has_valid_luma())
            .map(|f| {
                measure_borders(
                    f,
                    self.config.black_luma_threshold,
                    self.config.max_depth_fraction,
                )
            })
            .collect();

        if measured.is_empty() {
            return self.error(
                RuleErrorKind::MissingSignal,
                "no sampled frame carries a usable luminance plane",
            );
        }

        let pick = |f: fn(&BorderRatios) -> f64| {
            let mut values: Vec<f64> = measured.iter().map(f).collect();
            median(&mut values)
        };
        let aggregate = BorderRatios {
            top: pick(|r| r.top),
            bottom: pick(|r| r.bottom),
            left: pick(|r| r.left),
            right: pick(|r| r.right),
        };

        let threshold = self.config.border_threshold;
        let frames_over = measured
            .iter()
            .filter(|r| !r.exceeded(threshold).is_empty())
            .count();
        let exceeded = aggregate.exceeded(threshold);

        let mut details = Details::new();
        details.insert("top".into(), json!(round4(aggregate.top)));
        details.insert("bottom".into(), json!(round4(aggregate.bottom)));
        details.insert("left".into(), json!(round4(aggregate.left)));
        details.insert("right".into(), json!(round4(aggregate.right)));
        details.insert(
            "vertical_total".into(),
            json!(round4(aggregate.vertical_total())),
        );
        details.insert(
            "horizontal_total".into(),
            json!(round4(aggregate.horizontal_total())),
        );
        details.insert("threshold".into(), json!(threshold));
        details.insert("frame_count".into(), json!(measured.len()));

        debug!(
            "Border ratios: top={:.3} bottom={:.3} left={:.3} right={:.3}",
            aggregate.top, aggregate.bottom, aggregate.left, aggregate.right
        );

        if exceeded.is_empty() {
            return RuleOutcome::Pass(details);
        }

        let description = format!(
            "Black borders cover too much of the frame ({})",
            exceeded.join(", ")
        );
        details.insert("type".into(), json!("black_borders"));
        details.insert("exceeded".into(), json!(exceeded));

        RuleOutcome::Violation(
            Violation::new(
                RULE_ID,
                RULE_NAME,
                description,
                frames_over as f64 / measured.len() as f64,
            )
            .with_details(details),
        )
    }
}

#[async_trait]
impl ReviewRule for AspectRule {
    fn id(&self) -> RuleId {
        RULE_ID
    }

    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn description(&self) -> &'static str {
        "Detects portrait orientation and oversized black borders"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn check(&self, ctx: &ReviewContext) -> RuleOutcome {
        let frames = ctx.frames();
        if frames.is_empty() || frames.len() < self.config.min_frames {
            let reason = ctx.frame_error().unwrap_or("not enough frames sampled");
            return self.error(
                RuleErrorKind::MissingSignal,
                format!(
                    "{} of {} required frames available: {}",
                    frames.len(),
                    self.config.min_frames.max(1),
                    reason
                ),
            );
        }

        if let Some(outcome) = self.check_portrait(frames) {
            return outcome;
        }

        self.check_borders(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Landscape frame with black bands of the given heights/widths and a
    /// bright picture in the middle
    fn bordered_frame(
        ts: f64,
        width: u32,
        height: u32,
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    ) -> Frame {
        let (w, h) = (width as usize, height as usize);
        let mut luma = vec![200u8; w * h];
        for y in 0..h {
            for x in 0..w {
                if y < top || y >= h - bottom || x < left || x >= w - right {
                    luma[y * w + x] = 5;
                }
            }
        }
        Frame::new(ts, width, height, luma)
    }

    fn rule() -> AspectRule {
        AspectRule::new(AspectRuleConfig::default())
    }

    async fn check(frames: Vec<Frame>) -> RuleOutcome {
        rule()
            .check(&ReviewContext::new("v.mp4").with_frames(frames))
            .await
    }

    // =========================================================================
    // Border Measurement
    // =========================================================================

    #[test]
    fn test_measure_borders() {
        let frame = bordered_frame(0.0, 200, 100, 25, 20, 10, 0);
        let r = measure_borders(&frame, 15, 0.5);
        assert_eq!(r.top, 0.25);
        assert_eq!(r.bottom, 0.20);
        assert_eq!(r.left, 0.05);
        assert_eq!(r.right, 0.0);
    }

    #[test]
    fn test_fully_black_frame_caps_at_half() {
        let frame = Frame::new(0.0, 40, 20, vec![0; 800]);
        let r = measure_borders(&frame, 15, 0.5);
        assert_eq!(r.top, 0.5);
        assert_eq!(r.bottom, 0.5);
        assert_eq!(r.left, 0.5);
        assert_eq!(r.right, 0.5);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    // =========================================================================
    // Rule Outcomes
    // =========================================================================

    #[tokio::test]
    async fn test_vertical_borders_over_threshold() {
        let outcome = check(vec![bordered_frame(1.0, 200, 100, 25, 20, 0, 0)]).await;
        let RuleOutcome::Violation(v) = outcome else {
            panic!("expected violation");
        };
        assert_eq!(v.rule_id, 2);
        let total = v.details["vertical_total"].as_f64().unwrap();
        assert!((total - 0.45).abs() < 1e-9);
        assert_eq!(v.details["exceeded"], json!(["vertical"]));
        assert_eq!(v.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_small_borders_pass() {
        let outcome = check(vec![bordered_frame(1.0, 200, 100, 10, 10, 0, 0)]).await;
        let RuleOutcome::Pass(details) = outcome else {
            panic!("expected pass");
        };
        let total = details["vertical_total"].as_f64().unwrap();
        assert!((total - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pillarbox_detected() {
        let outcome = check(vec![bordered_frame(1.0, 200, 100, 0, 0, 45, 45)]).await;
        let RuleOutcome::Violation(v) = outcome else {
            panic!("expected violation");
        };
        assert_eq!(v.details["exceeded"], json!(["horizontal"]));
    }

    #[tokio::test]
    async fn test_portrait_always_triggers() {
        let outcome = check(vec![Frame::new(0.5, 1080, 1920, Vec::new())]).await;
        let RuleOutcome::Violation(v) = outcome else {
            panic!("expected violation");
        };
        assert_eq!(v.details["type"], json!("portrait"));
        assert_eq!(v.details["width"], json!(1080));
        assert_eq!(v.details["height"], json!(1920));
    }

    #[tokio::test]
    async fn test_single_black_frame_does_not_flag_video() {
        let frames = vec![
            bordered_frame(1.0, 200, 100, 0, 0, 0, 0),
            Frame::new(2.0, 200, 100, vec![0; 200 * 100]),
            bordered_frame(3.0, 200, 100, 5, 5, 0, 0),
        ];
        let outcome = check(frames).await;
        assert!(outcome.is_pass(), "fade frame flagged: {outcome:?}");
    }

    #[tokio::test]
    async fn test_confidence_is_fraction_of_frames_over() {
        let frames = vec![
            bordered_frame(1.0, 200, 100, 25, 25, 0, 0),
            bordered_frame(2.0, 200, 100, 25, 25, 0, 0),
            bordered_frame(3.0, 200, 100, 0, 0, 0, 0),
        ];
        let RuleOutcome::Violation(v) = check(frames).await else {
            panic!("expected violation");
        };
        assert!((v.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_frames_is_error() {
        let ctx = ReviewContext::new("v.mp4").with_frame_error("ffmpeg failed");
        let RuleOutcome::Error(e) = rule().check(&ctx).await else {
            panic!("expected error");
        };
        assert_eq!(e.kind, RuleErrorKind::MissingSignal);
        assert!(e.message.contains("ffmpeg failed"));
    }
}
