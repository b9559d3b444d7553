//! Media Extraction
//!
//! Produces the per-video signals rules consume, using ffprobe, ffmpeg and
//! (optionally) fpcalc.

pub mod ffmpeg;
pub mod fingerprint;
pub mod loudness;
pub mod probe;

// Re-export main types
pub use ffmpeg::{frame_timestamps, scaled_dimensions, FfmpegMediaSource, MediaTools};
pub use fingerprint::parse_fpcalc_output;
pub use loudness::{load_wav_samples, rms_dbfs, segment_loudness, SILENCE_FLOOR_DB};
pub use probe::{parse_probe_output, VideoProbe};
