//! Review Configuration
//!
//! JSON-backed configuration for rules, external services, retries, media
//! extraction and batch runs. Every section defaults independently so a
//! partial file merges onto the built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::review::rules::content::ContentCategory;
use crate::core::{CoreError, CoreResult, RuleId};

/// Video file extensions picked up by directory enumeration
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] =
    &["ts", "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm"];

/// Default OpenAI-compatible vision endpoint
pub const DEFAULT_VISION_API_URL: &str = "https://api.siliconflow.cn/v1";

/// Default vision-language model
pub const DEFAULT_VISION_MODEL: &str = "Qwen/Qwen2-VL-72B-Instruct";

/// Default AcoustID lookup endpoint
pub const DEFAULT_ACOUSTID_URL: &str = "https://api.acoustid.org/v2/lookup";

/// Default MusicBrainz web service root
pub const DEFAULT_MUSICBRAINZ_URL: &str = "https://musicbrainz.org/ws/2";

/// Top-level review configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReviewConfig {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl ReviewConfig {
    /// Loads a configuration file, merging it onto defaults and normalizing.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&raw)?;
        config.normalize();
        info!("Loaded review configuration from {}", path.display());
        Ok(config)
    }

    /// Parses configuration JSON without touching the filesystem
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| CoreError::InvalidConfig(format!("Malformed configuration: {}", e)))
    }

    /// Clamps out-of-range values back into their valid domains.
    pub fn normalize(&mut self) {
        let m = &mut self.rules.metadata;
        m.min_match_confidence = clamp_f64(m.min_match_confidence, 0.0, 1.0);
        m.blocked_creators.retain(|c| !c.trim().is_empty());

        let a = &mut self.rules.aspect;
        a.border_threshold = clamp_f64(a.border_threshold, 0.0, 1.0);
        a.max_depth_fraction = clamp_f64(a.max_depth_fraction, 0.0, 0.5);
        a.min_frames = a.min_frames.max(1);

        let v = &mut self.rules.volume;
        if !v.change_threshold_db.is_finite() || v.change_threshold_db <= 0.0 {
            v.change_threshold_db = default_change_threshold_db();
        }

        let c = &mut self.rules.content;
        c.confidence_threshold = clamp_f64(c.confidence_threshold, 0.0, 1.0);
        c.max_frames = c.max_frames.clamp(1, 32);
        c.categories.sort();
        c.categories.dedup();

        self.retry.max_attempts = self.retry.max_attempts.clamp(1, 10);
        self.retry.max_delay_ms = self.retry.max_delay_ms.max(self.retry.base_delay_ms);
        self.retry.call_timeout_ms = self.retry.call_timeout_ms.max(100);

        self.services.acoustid.requests_per_second =
            self.services.acoustid.requests_per_second.max(1);
        self.services.musicbrainz.requests_per_second =
            self.services.musicbrainz.requests_per_second.max(1);
        self.services.vision.requests_per_second = self.services.vision.requests_per_second.max(1);
        self.services.vision.temperature = clamp_f64(self.services.vision.temperature, 0.0, 2.0);

        self.media.sample_frames = self.media.sample_frames.clamp(1, 64);
        self.media.loudness_segment_ms = self.media.loudness_segment_ms.clamp(100, 10_000);
        self.media.frame_max_width = self.media.frame_max_width.clamp(64, 4096);

        self.batch.rule_timeout_ms = self.batch.rule_timeout_ms.max(1_000);
        for ext in &mut self.batch.extensions {
            *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        }
        self.batch.extensions.retain(|e| !e.is_empty());
    }

    /// Reports configuration errors that must abort a run before any video is
    /// processed.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch.extensions.is_empty() {
            return Err(CoreError::InvalidConfig(
                "batch.extensions must list at least one video extension".to_string(),
            ));
        }
        if self.rules.content.enabled && self.rules.content.categories.is_empty() {
            return Err(CoreError::InvalidConfig(
                "rules.content is enabled but no categories are selected".to_string(),
            ));
        }
        if self.rules.content.enabled && self.services.vision.api_url.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "services.vision.api_url is required when the content rule is enabled"
                    .to_string(),
            ));
        }
        if self.rules.metadata.enabled && self.services.musicbrainz.user_agent.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "services.musicbrainz.user_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Restricts the run to the given report numbers.
    ///
    /// Numbers 1-3 select the metadata, aspect and volume rules; 4-7 select
    /// content categories (4 exposure and inappropriate, 5 landscape only,
    /// 6 advertisement, 7 drug use). Anything else is rejected.
    pub fn select_rules(&mut self, numbers: &[RuleId]) -> CoreResult<()> {
        if let Some(bad) = numbers.iter().find(|n| !(1..=7).contains(*n)) {
            return Err(CoreError::InvalidConfig(format!(
                "Unknown rule number {} (expected 1-7)",
                bad
            )));
        }

        self.rules.metadata.enabled = numbers.contains(&1);
        self.rules.aspect.enabled = numbers.contains(&2);
        self.rules.volume.enabled = numbers.contains(&3);

        let categories: Vec<ContentCategory> = ContentCategory::all()
            .iter()
            .copied()
            .filter(|c| numbers.contains(&c.report_number()))
            .collect();
        self.rules.content.enabled = !categories.is_empty();
        if !categories.is_empty() {
            self.rules.content.categories = categories;
        }
        Ok(())
    }

    /// Switches off rules whose external services cannot be reached with the
    /// configured credentials and returns one warning per disabled rule.
    ///
    /// The metadata rule needs an AcoustID key. The content rule needs an API
    /// key unless a custom (e.g. local) endpoint is configured.
    pub fn disable_unreachable_rules(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.rules.metadata.enabled && !has_key(&self.services.acoustid.api_key) {
            self.rules.metadata.enabled = false;
            warnings.push(
                "metadata rule disabled: no AcoustID API key (set MVREVIEW_ACOUSTID_KEY)"
                    .to_string(),
            );
        }

        let vision = &self.services.vision;
        let needs_key = vision.api_url.trim_end_matches('/') == DEFAULT_VISION_API_URL;
        if self.rules.content.enabled && needs_key && !has_key(&vision.api_key) {
            self.rules.content.enabled = false;
            warnings.push(
                "content rules disabled: no vision API key (set MVREVIEW_VISION_API_KEY)"
                    .to_string(),
            );
        }

        warnings
    }

    /// Effective worker count for batch runs
    pub fn worker_count(&self) -> usize {
        if self.batch.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.batch.workers
        }
    }
}

fn has_key(key: &Option<String>) -> bool {
    key.as_deref().is_some_and(|k| !k.trim().is_empty())
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

// =============================================================================
// Rule Configuration
// =============================================================================

/// Per-rule configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RulesConfig {
    #[serde(default)]
    pub metadata: MetadataRuleConfig,
    #[serde(default)]
    pub aspect: AspectRuleConfig,
    #[serde(default)]
    pub volume: VolumeRuleConfig,
    #[serde(default)]
    pub content: ContentRuleConfig,
}

/// Blocked-creator detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Canonical names of blocked lyricists/composers
    #[serde(default = "default_blocked_creators")]
    pub blocked_creators: Vec<String>,
    /// Alternative spellings keyed by canonical name
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Fingerprint matches below this score count as unidentified
    #[serde(default = "default_min_match_confidence")]
    pub min_match_confidence: f64,
}

impl Default for MetadataRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_creators: default_blocked_creators(),
            aliases: BTreeMap::new(),
            min_match_confidence: default_min_match_confidence(),
        }
    }
}

/// Orientation and border detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AspectRuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Combined border ratio on either axis that triggers a violation
    #[serde(default = "default_border_threshold")]
    pub border_threshold: f64,
    /// Mean luma at or below which a line counts as black
    #[serde(default = "default_black_luma_threshold")]
    pub black_luma_threshold: u8,
    /// How far into the frame each edge is scanned
    #[serde(default = "default_max_depth_fraction")]
    pub max_depth_fraction: f64,
    /// Frames required before the rule can decide
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,
}

impl Default for AspectRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            border_threshold: default_border_threshold(),
            black_luma_threshold: default_black_luma_threshold(),
            max_depth_fraction: default_max_depth_fraction(),
            min_frames: default_min_frames(),
        }
    }
}

/// Loudness spike detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeRuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum level change between consecutive segments
    #[serde(default = "default_change_threshold_db")]
    pub change_threshold_db: f64,
    /// Pairs with either level below this floor are ignored; `null` disables
    #[serde(default = "default_silence_floor_db")]
    pub silence_floor_db: Option<f64>,
}

impl Default for VolumeRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            change_threshold_db: default_change_threshold_db(),
            silence_floor_db: default_silence_floor_db(),
        }
    }
}

/// Vision-language content classification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentRuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_content_confidence")]
    pub confidence_threshold: f64,
    #[serde(default = "default_content_max_frames")]
    pub max_frames: usize,
    #[serde(default = "default_content_categories")]
    pub categories: Vec<ContentCategory>,
}

impl Default for ContentRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_content_confidence(),
            max_frames: default_content_max_frames(),
            categories: default_content_categories(),
        }
    }
}

// =============================================================================
// Service Configuration
// =============================================================================

/// External service endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub acoustid: AcoustIdConfig,
    #[serde(default)]
    pub musicbrainz: MusicBrainzConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcoustIdConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_acoustid_url")]
    pub base_url: String,
    #[serde(default = "default_acoustid_rps")]
    pub requests_per_second: u32,
}

impl Default for AcoustIdConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_acoustid_url(),
            requests_per_second: default_acoustid_rps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MusicBrainzConfig {
    #[serde(default = "default_musicbrainz_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_musicbrainz_rps")]
    pub requests_per_second: u32,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            base_url: default_musicbrainz_url(),
            user_agent: default_user_agent(),
            requests_per_second: default_musicbrainz_rps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisionConfig {
    #[serde(default = "default_vision_url")]
    pub api_url: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_vision_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_vision_temperature")]
    pub temperature: f64,
    #[serde(default = "default_vision_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_url: default_vision_url(),
            model: default_vision_model(),
            api_key: None,
            requests_per_second: default_vision_rps(),
            temperature: default_vision_temperature(),
            max_tokens: default_vision_max_tokens(),
        }
    }
}

/// Retry policy applied to every external call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

// =============================================================================
// Media & Batch Configuration
// =============================================================================

/// Media extraction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
    #[serde(default)]
    pub fpcalc_path: Option<PathBuf>,
    /// Frames sampled per video, spread evenly between 10% and 90%
    #[serde(default = "default_sample_frames")]
    pub sample_frames: usize,
    #[serde(default = "default_loudness_segment_ms")]
    pub loudness_segment_ms: u64,
    /// Seconds of audio fed to the fingerprinter
    #[serde(default = "default_fingerprint_seconds")]
    pub fingerprint_seconds: u32,
    /// Width of the JPEG frames sent to the classifier
    #[serde(default = "default_frame_max_width")]
    pub frame_max_width: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            fpcalc_path: None,
            sample_frames: default_sample_frames(),
            loudness_segment_ms: default_loudness_segment_ms(),
            fingerprint_seconds: default_fingerprint_seconds(),
            frame_max_width: default_frame_max_width(),
        }
    }
}

/// Batch run settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// Worker count, 0 means one per CPU
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_violation_dir")]
    pub violation_dir: PathBuf,
    #[serde(default = "default_rule_timeout_ms")]
    pub rule_timeout_ms: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            recursive: false,
            dry_run: false,
            violation_dir: default_violation_dir(),
            rule_timeout_ms: default_rule_timeout_ms(),
            extensions: default_extensions(),
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_blocked_creators() -> Vec<String> {
    vec!["林夕".to_string()]
}

fn default_min_match_confidence() -> f64 {
    0.5
}

fn default_border_threshold() -> f64 {
    0.40
}

fn default_black_luma_threshold() -> u8 {
    15
}

fn default_max_depth_fraction() -> f64 {
    0.5
}

fn default_min_frames() -> usize {
    1
}

fn default_change_threshold_db() -> f64 {
    10.0
}

fn default_silence_floor_db() -> Option<f64> {
    Some(-55.0)
}

fn default_content_confidence() -> f64 {
    0.7
}

fn default_content_max_frames() -> usize {
    5
}

fn default_content_categories() -> Vec<ContentCategory> {
    ContentCategory::all().to_vec()
}

fn default_acoustid_url() -> String {
    DEFAULT_ACOUSTID_URL.to_string()
}

fn default_acoustid_rps() -> u32 {
    3
}

fn default_musicbrainz_url() -> String {
    DEFAULT_MUSICBRAINZ_URL.to_string()
}

fn default_user_agent() -> String {
    format!(
        "mvreview/{} ( https://github.com/mvreview/mvreview )",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_musicbrainz_rps() -> u32 {
    1
}

fn default_vision_url() -> String {
    DEFAULT_VISION_API_URL.to_string()
}

fn default_vision_model() -> String {
    DEFAULT_VISION_MODEL.to_string()
}

fn default_vision_rps() -> u32 {
    2
}

fn default_vision_temperature() -> f64 {
    0.1
}

fn default_vision_max_tokens() -> u32 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_sample_frames() -> usize {
    5
}

fn default_loudness_segment_ms() -> u64 {
    1_000
}

fn default_fingerprint_seconds() -> u32 {
    30
}

fn default_frame_max_width() -> u32 {
    640
}

fn default_violation_dir() -> PathBuf {
    PathBuf::from("violations")
}

fn default_rule_timeout_ms() -> u64 {
    120_000
}

fn default_extensions() -> Vec<String> {
    DEFAULT_VIDEO_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}
