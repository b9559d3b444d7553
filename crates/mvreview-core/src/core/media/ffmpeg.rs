//! ffmpeg-backed media source
//!
//! Probes each video, samples grayscale frames (plus JPEGs for the vision
//! classifier), measures loudness per segment and computes a Chromaprint
//! fingerprint when `fpcalc` is installed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::fingerprint::parse_fpcalc_output;
use super::loudness::{load_wav_samples, segment_loudness, ANALYSIS_SAMPLE_RATE};
use super::probe::{parse_probe_output, VideoProbe};
use crate::core::config::MediaConfig;
use crate::core::process::{locate_tool, run_tool};
use crate::core::review::{
    AudioSample, ExtractionOptions, Frame, LoudnessSegment, MediaSignals, MediaSource,
};
use crate::core::{CoreError, CoreResult, TimeSec};

// =============================================================================
// Tool Detection
// =============================================================================

/// Resolved external binaries
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Fingerprinting is skipped without it
    pub fpcalc: Option<PathBuf>,
}

impl MediaTools {
    /// Locates the tools, honoring explicit paths from configuration
    pub fn detect(config: &MediaConfig) -> CoreResult<Self> {
        let ffmpeg = locate_tool("ffmpeg", config.ffmpeg_path.as_deref())
            .ok_or_else(|| CoreError::MediaTool("ffmpeg not found".into()))?;
        let ffprobe = locate_tool("ffprobe", config.ffprobe_path.as_deref())
            .ok_or_else(|| CoreError::MediaTool("ffprobe not found".into()))?;
        let fpcalc = locate_tool("fpcalc", config.fpcalc_path.as_deref());

        debug!(
            "Media tools: ffmpeg={}, ffprobe={}, fpcalc={}",
            ffmpeg.display(),
            ffprobe.display(),
            fpcalc
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".into())
        );

        Ok(Self {
            ffmpeg,
            ffprobe,
            fpcalc,
        })
    }
}

// =============================================================================
// Sampling Helpers
// =============================================================================

/// Timestamps spread evenly over 10%..90% of the duration
pub fn frame_timestamps(duration_sec: TimeSec, count: usize) -> Vec<TimeSec> {
    if count == 0 {
        return Vec::new();
    }
    if duration_sec.is_nan() || duration_sec <= 0.0 {
        return vec![0.0];
    }
    if count == 1 {
        return vec![duration_sec * 0.5];
    }
    (0..count)
        .map(|i| duration_sec * (0.1 + 0.8 * i as f64 / (count - 1) as f64))
        .collect()
}

/// Downscales to at most `max_width` keeping the aspect ratio
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if max_width == 0 || width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled_height = (height as f64 * max_width as f64 / width as f64).round() as u32;
    (max_width, scaled_height.max(1))
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(|a| OsString::from(*a)).collect()
}

// =============================================================================
// Media Source
// =============================================================================

/// [`MediaSource`] backed by ffmpeg, ffprobe and fpcalc
pub struct FfmpegMediaSource {
    tools: MediaTools,
    config: MediaConfig,
}

impl FfmpegMediaSource {
    pub fn new(tools: MediaTools, config: MediaConfig) -> Self {
        Self { tools, config }
    }

    /// Detects the tools and builds the source
    pub fn detect(config: &MediaConfig) -> CoreResult<Self> {
        Ok(Self::new(MediaTools::detect(config)?, config.clone()))
    }

    pub fn tools(&self) -> &MediaTools {
        &self.tools
    }

    async fn probe(&self, path: &Path) -> CoreResult<VideoProbe> {
        let mut args = os_args(&[
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        args.push(path.as_os_str().to_owned());

        let stdout = run_tool(&self.tools.ffprobe, args).await?;
        parse_probe_output(&String::from_utf8_lossy(&stdout))
    }

    fn frame_args(path: &Path, timestamp: TimeSec, width: u32, height: u32) -> Vec<OsString> {
        let mut args = os_args(&["-hide_banner", "-loglevel", "error", "-ss"]);
        args.push(format!("{:.3}", timestamp).into());
        args.push("-i".into());
        args.push(path.as_os_str().to_owned());
        args.extend(os_args(&["-frames:v", "1", "-vf"]));
        args.push(format!("scale={}:{}", width, height).into());
        args
    }

    async fn grab_luma(&self, path: &Path, ts: TimeSec, w: u32, h: u32) -> CoreResult<Vec<u8>> {
        let mut args = Self::frame_args(path, ts, w, h);
        args.extend(os_args(&["-f", "rawvideo", "-pix_fmt", "gray", "-"]));
        let luma = run_tool(&self.tools.ffmpeg, args).await?;

        let expected = w as usize * h as usize;
        if luma.len() < expected {
            return Err(CoreError::MediaTool(format!(
                "short frame at {:.2}s: {} of {} bytes",
                ts,
                luma.len(),
                expected
            )));
        }
        Ok(luma[..expected].to_vec())
    }

    async fn grab_jpeg(&self, path: &Path, ts: TimeSec, w: u32, h: u32) -> CoreResult<Vec<u8>> {
        let mut args = Self::frame_args(path, ts, w, h);
        args.extend(os_args(&["-f", "image2pipe", "-c:v", "mjpeg", "-q:v", "3", "-"]));
        let jpeg = run_tool(&self.tools.ffmpeg, args).await?;
        if jpeg.is_empty() {
            return Err(CoreError::MediaTool(format!("empty image at {:.2}s", ts)));
        }
        Ok(jpeg)
    }

    async fn extract_frames(
        &self,
        path: &Path,
        probe: &VideoProbe,
        with_images: bool,
    ) -> Result<Vec<Frame>, String> {
        if !probe.has_dimensions() {
            return Err("no video stream".into());
        }
        let (w, h) = scaled_dimensions(probe.width, probe.height, self.config.frame_max_width);

        let mut frames = Vec::new();
        let mut last_error = None;
        for ts in frame_timestamps(probe.duration_sec, self.config.sample_frames) {
            let luma = match self.grab_luma(path, ts, w, h).await {
                Ok(luma) => luma,
                Err(e) => {
                    warn!("Frame grab at {:.2}s of {} failed: {}", ts, path.display(), e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            let mut frame = Frame::new(ts, w, h, luma);
            if with_images {
                match self.grab_jpeg(path, ts, w, h).await {
                    Ok(jpeg) => frame = frame.with_image(jpeg),
                    Err(e) => warn!("Image grab at {:.2}s of {} failed: {}", ts, path.display(), e),
                }
            }
            frames.push(frame);
        }

        if frames.is_empty() {
            return Err(last_error.unwrap_or_else(|| "no frames sampled".into()));
        }
        Ok(frames)
    }

    async fn extract_loudness(
        &self,
        path: &Path,
        probe: &VideoProbe,
    ) -> CoreResult<Vec<LoudnessSegment>> {
        if !probe.has_audio {
            return Err(CoreError::MediaTool("no audio stream".into()));
        }

        let scratch = tempfile::TempDir::new()?;
        let wav = scratch.path().join("audio.wav");

        let mut args = os_args(&["-hide_banner", "-loglevel", "error", "-i"]);
        args.push(path.as_os_str().to_owned());
        args.extend(os_args(&[
            "-vn",
            "-ar",
            "16000",
            "-ac",
            "1",
            "-c:a",
            "pcm_s16le",
            "-y",
        ]));
        args.push(wav.as_os_str().to_owned());
        run_tool(&self.tools.ffmpeg, args).await?;

        let segment_ms = self.config.loudness_segment_ms;
        tokio::task::spawn_blocking(move || -> CoreResult<Vec<LoudnessSegment>> {
            let samples = load_wav_samples(&wav)?;
            drop(scratch);
            Ok(segment_loudness(&samples, ANALYSIS_SAMPLE_RATE, segment_ms))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("loudness task failed: {}", e)))?
    }

    async fn fingerprint(&self, path: &Path) -> CoreResult<Option<AudioSample>> {
        let Some(fpcalc) = &self.tools.fpcalc else {
            return Ok(None);
        };
        let mut args = os_args(&["-json", "-length"]);
        args.push(self.config.fingerprint_seconds.to_string().into());
        args.push(path.as_os_str().to_owned());

        let stdout = run_tool(fpcalc, args).await?;
        parse_fpcalc_output(&String::from_utf8_lossy(&stdout)).map(Some)
    }
}

#[async_trait]
impl MediaSource for FfmpegMediaSource {
    async fn extract(&self, path: &Path, options: &ExtractionOptions) -> CoreResult<MediaSignals> {
        if !path.is_file() {
            return Err(CoreError::FileNotFound(path.to_path_buf()));
        }

        let probe = self
            .probe(path)
            .await
            .map_err(|e| CoreError::VideoProcessing {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !probe.has_video && !probe.has_audio {
            return Err(CoreError::VideoProcessing {
                path: path.to_path_buf(),
                reason: "no video or audio streams".into(),
            });
        }

        let mut signals = MediaSignals::default();

        if options.frames {
            match self.extract_frames(path, &probe, options.frame_images).await {
                Ok(frames) => signals.frames = frames,
                Err(reason) => signals.frame_error = Some(reason),
            }
        }

        if options.loudness {
            match self.extract_loudness(path, &probe).await {
                Ok(segments) => signals.loudness = segments,
                Err(e) => {
                    debug!("No loudness for {}: {}", path.display(), e);
                    signals.audio_error = Some(e.to_string());
                }
            }
        }

        if options.fingerprint && probe.has_audio {
            match self.fingerprint(path).await {
                Ok(sample) => signals.audio_sample = sample,
                Err(e) => warn!("Fingerprinting {} failed: {}", path.display(), e),
            }
        }

        debug!(
            "Extracted {} frame(s), {} loudness segment(s) from {}",
            signals.frames.len(),
            signals.loudness.len(),
            path.display()
        );
        Ok(signals)
    }
}
