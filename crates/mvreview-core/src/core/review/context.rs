//! Review Context
//!
//! Immutable per-video bundle of precomputed signals shared read-only by all
//! rules, and the media collaborator contract that produces it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Confidence, CoreResult, Decibels, TimeSec};

// =============================================================================
// Signals
// =============================================================================

/// A sampled video frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp_sec: TimeSec,
    pub width: u32,
    pub height: u32,
    /// Row-major 8-bit luminance plane, `width * height` bytes
    pub luma: Vec<u8>,
    /// Encoded JPEG used by image classifiers
    pub image: Option<Vec<u8>>,
}

impl Frame {
    /// Creates a frame from a luminance plane
    pub fn new(timestamp_sec: TimeSec, width: u32, height: u32, luma: Vec<u8>) -> Self {
        Self {
            timestamp_sec,
            width,
            height,
            luma,
            image: None,
        }
    }

    /// Attaches an encoded image
    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    /// Whether the luminance plane matches the declared dimensions
    pub fn has_valid_luma(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.luma.len() == self.width as usize * self.height as usize
    }

    /// Taller than wide
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    /// Mean luminance of row `y`
    pub fn row_mean(&self, y: usize) -> f64 {
        let w = self.width as usize;
        let row = &self.luma[y * w..(y + 1) * w];
        row.iter().map(|&v| v as u64).sum::<u64>() as f64 / w as f64
    }

    /// Mean luminance of column `x`
    pub fn column_mean(&self, x: usize) -> f64 {
        let w = self.width as usize;
        let h = self.height as usize;
        let sum: u64 = (0..h).map(|y| self.luma[y * w + x] as u64).sum();
        sum as f64 / h as f64
    }
}

/// Loudness of one fixed-length audio segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessSegment {
    pub start_sec: TimeSec,
    pub duration_sec: TimeSec,
    pub rms_db: Decibels,
}

/// Audio fingerprint ready for identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSample {
    /// Chromaprint fingerprint string
    pub fingerprint: String,
    /// Length of the fingerprinted audio in whole seconds
    pub duration_sec: u32,
}

/// A song identified from audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintMatch {
    pub title: String,
    pub performer: String,
    pub confidence: Confidence,
}

/// Signals produced by a [`MediaSource`]
///
/// Each signal can be missing independently; the `*_error` fields say why.
#[derive(Debug, Clone, Default)]
pub struct MediaSignals {
    pub frames: Vec<Frame>,
    pub frame_error: Option<String>,
    pub loudness: Vec<LoudnessSegment>,
    pub audio_error: Option<String>,
    pub transcript: Option<String>,
    pub audio_sample: Option<AudioSample>,
    pub fingerprint: Option<FingerprintMatch>,
}

/// What the orchestrator needs extracted for the enabled rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub frames: bool,
    pub frame_images: bool,
    pub loudness: bool,
    pub fingerprint: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            frames: true,
            frame_images: true,
            loudness: true,
            fingerprint: true,
        }
    }
}

/// Boundary collaborator that decodes a video into signals.
///
/// `Err` means the video itself is unreadable; partial failures are reported
/// through the `*_error` fields of [`MediaSignals`].
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn extract(&self, path: &Path, options: &ExtractionOptions)
        -> CoreResult<MediaSignals>;
}

// =============================================================================
// ReviewContext
// =============================================================================

/// Immutable per-video signal bundle
#[derive(Debug, Clone)]
pub struct ReviewContext {
    path: PathBuf,
    frames: Vec<Frame>,
    frame_error: Option<String>,
    loudness: Vec<LoudnessSegment>,
    audio_error: Option<String>,
    transcript: Option<String>,
    audio_sample: Option<AudioSample>,
    fingerprint: Option<FingerprintMatch>,
}

impl ReviewContext {
    /// Creates an empty context for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: Vec::new(),
            frame_error: None,
            loudness: Vec::new(),
            audio_error: None,
            transcript: None,
            audio_sample: None,
            fingerprint: None,
        }
    }

    /// Builds a context from extracted signals
    pub fn from_signals(path: impl Into<PathBuf>, signals: MediaSignals) -> Self {
        let mut ctx = Self::new(path)
            .with_frames(signals.frames)
            .with_loudness(signals.loudness);
        ctx.frame_error = signals.frame_error;
        ctx.audio_error = signals.audio_error;
        ctx.transcript = signals.transcript;
        ctx.audio_sample = signals.audio_sample;
        ctx.fingerprint = signals.fingerprint;
        ctx
    }

    /// Sets frames, ordering them by timestamp
    pub fn with_frames(mut self, mut frames: Vec<Frame>) -> Self {
        frames.sort_by(|a, b| a.timestamp_sec.total_cmp(&b.timestamp_sec));
        self.frames = frames;
        self
    }

    /// Sets loudness segments, ordering them by start time
    pub fn with_loudness(mut self, mut loudness: Vec<LoudnessSegment>) -> Self {
        loudness.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));
        self.loudness = loudness;
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn with_audio_sample(mut self, sample: AudioSample) -> Self {
        self.audio_sample = Some(sample);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: FingerprintMatch) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_frame_error(mut self, reason: impl Into<String>) -> Self {
        self.frame_error = Some(reason.into());
        self
    }

    pub fn with_audio_error(mut self, reason: impl Into<String>) -> Self {
        self.audio_error = Some(reason.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames ordered by timestamp
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_error(&self) -> Option<&str> {
        self.frame_error.as_deref()
    }

    pub fn loudness(&self) -> &[LoudnessSegment] {
        &self.loudness
    }

    pub fn audio_error(&self) -> Option<&str> {
        self.audio_error.as_deref()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn audio_sample(&self) -> Option<&AudioSample> {
        self.audio_sample.as_ref()
    }

    pub fn fingerprint(&self) -> Option<&FingerprintMatch> {
        self.fingerprint.as_ref()
    }
}
