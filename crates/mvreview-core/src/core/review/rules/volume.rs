//! Volume Rule
//!
//! Detects abrupt loudness jumps between consecutive audio segments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ReviewRule;
use crate::core::config::VolumeRuleConfig;
use crate::core::review::context::{LoudnessSegment, ReviewContext};
use crate::core::review::violation::{Details, RuleOutcome, Violation};
use crate::core::{Decibels, RuleId, TimeSec};

pub const RULE_ID: RuleId = 3;
pub const RULE_NAME: &str = "volume";

/// Direction of a loudness jump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeDirection {
    Increase,
    Decrease,
}

/// One loudness jump between two consecutive segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    /// Start of the earlier segment
    pub start_sec: TimeSec,
    /// End of the later segment
    pub end_sec: TimeSec,
    pub from_db: Decibels,
    pub to_db: Decibels,
    /// Absolute level change
    pub delta_db: Decibels,
    pub direction: SpikeDirection,
}

/// Finds every consecutive pair whose level differs by at least
/// `threshold_db`, skipping pairs with a level under `silence_floor_db`.
pub fn find_spikes(
    segments: &[LoudnessSegment],
    threshold_db: f64,
    silence_floor_db: Option<f64>,
) -> Vec<SpikeEvent> {
    segments
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            if let Some(floor) = silence_floor_db {
                if a.rms_db < floor || b.rms_db < floor {
                    return None;
                }
            }
            let change = b.rms_db - a.rms_db;
            if change.abs() < threshold_db {
                return None;
            }
            Some(SpikeEvent {
                start_sec: a.start_sec,
                end_sec: b.start_sec + b.duration_sec,
                from_db: a.rms_db,
                to_db: b.rms_db,
                delta_db: change.abs(),
                direction: if change > 0.0 {
                    SpikeDirection::Increase
                } else {
                    SpikeDirection::Decrease
                },
            })
        })
        .collect()
}

/// Loudness spike detection
pub struct VolumeRule {
    config: VolumeRuleConfig,
}

impl VolumeRule {
    pub fn new(config: VolumeRuleConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ReviewRule for VolumeRule {
    fn id(&self) -> RuleId {
        RULE_ID
    }

    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn description(&self) -> &'static str {
        "Detects sudden loudness changes between consecutive segments"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn check(&self, ctx: &ReviewContext) -> RuleOutcome {
        let segments = ctx.loudness();
        if segments.len() < 2 {
            let mut details = Details::new();
            details.insert("insufficient_audio".into(), json!(true));
            details.insert("segment_count".into(), json!(segments.len()));
            if let Some(reason) = ctx.audio_error() {
                details.insert("audio_error".into(), json!(reason));
            }
            return RuleOutcome::Pass(details);
        }

        let threshold = self.config.change_threshold_db;
        let spikes = find_spikes(segments, threshold, self.config.silence_floor_db);

        if spikes.is_empty() {
            let mut details = Details::new();
            details.insert("segment_count".into(), json!(segments.len()));
            details.insert("threshold_db".into(), json!(threshold));
            return RuleOutcome::Pass(details);
        }

        let largest = spikes
            .iter()
            .map(|s| s.delta_db)
            .fold(0.0_f64, f64::max);
        let description = format!(
            "{} sudden volume change(s), largest {:.1} dB",
            spikes.len(),
            largest
        );

        RuleOutcome::Violation(
            Violation::new(
                RULE_ID,
                RULE_NAME,
                description,
                spikes.len() as f64 / 3.0,
            )
            .with_detail("spike_count", spikes.len())
            .with_detail("threshold_db", threshold)
            .with_detail("spikes", json!(spikes)),
        )
    }
}
