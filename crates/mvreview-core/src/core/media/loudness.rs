//! Loudness Analysis
//!
//! Decodes the 16 kHz mono WAV ffmpeg produces and measures RMS level per
//! fixed-length segment.

use std::path::Path;

use crate::core::review::LoudnessSegment;
use crate::core::{CoreError, CoreResult, Decibels};

/// Sample rate ffmpeg is asked to resample to
pub const ANALYSIS_SAMPLE_RATE: u32 = 16_000;

/// Level reported for digital silence
pub const SILENCE_FLOOR_DB: Decibels = -60.0;

/// RMS level of normalized samples in dBFS, never below [`SILENCE_FLOOR_DB`]
pub fn rms_dbfs(samples: &[f32]) -> Decibels {
    if samples.is_empty() {
        return SILENCE_FLOOR_DB;
    }
    let mean_square = samples
        .iter()
        .map(|&s| (s as f64) * (s as f64))
        .sum::<f64>()
        / samples.len() as f64;
    let rms = mean_square.sqrt();
    if rms <= 0.0 {
        return SILENCE_FLOOR_DB;
    }
    (20.0 * rms.log10()).max(SILENCE_FLOOR_DB)
}

/// Splits samples into consecutive `segment_ms` windows and measures each.
/// The last window may be shorter.
pub fn segment_loudness(samples: &[f32], sample_rate: u32, segment_ms: u64) -> Vec<LoudnessSegment> {
    if sample_rate == 0 || segment_ms == 0 {
        return Vec::new();
    }
    let per_segment = ((sample_rate as u64 * segment_ms) / 1000).max(1) as usize;

    samples
        .chunks(per_segment)
        .enumerate()
        .map(|(i, chunk)| LoudnessSegment {
            start_sec: (i * per_segment) as f64 / sample_rate as f64,
            duration_sec: chunk.len() as f64 / sample_rate as f64,
            rms_db: rms_dbfs(chunk),
        })
        .collect()
}

/// Loads a 16 kHz mono WAV as normalized f32 samples
pub fn load_wav_samples(wav_path: &Path) -> CoreResult<Vec<f32>> {
    let reader = hound::WavReader::open(wav_path)
        .map_err(|e| CoreError::MediaTool(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();
    if spec.sample_rate != ANALYSIS_SAMPLE_RATE {
        return Err(CoreError::MediaTool(format!(
            "Expected 16kHz sample rate, got {} Hz",
            spec.sample_rate
        )));
    }
    if spec.channels != 1 {
        return Err(CoreError::MediaTool(format!(
            "Expected mono audio, got {} channels",
            spec.channels
        )));
    }

    let samples: Vec<f32> = match spec.bits_per_sample {
        16 => reader
            .into_samples::<i16>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 32768.0)
            .collect(),
        32 => reader
            .into_samples::<i32>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        bits => {
            return Err(CoreError::MediaTool(format!(
                "Unsupported bit depth: {}",
                bits
            )));
        }
    };

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_full_scale_square_is_zero_db() {
        let samples: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(rms_dbfs(&samples).abs() < 1e-9);
    }

    #[test]
    fn test_half_amplitude_is_about_minus_six_db() {
        let samples = vec![0.5f32; 64];
        assert!((rms_dbfs(&samples) - (-6.0206)).abs() < 1e-3);
    }

    #[test]
    fn test_silence_hits_floor() {
        assert_eq!(rms_dbfs(&[0.0; 10]), SILENCE_FLOOR_DB);
        assert_eq!(rms_dbfs(&[]), SILENCE_FLOOR_DB);
        assert_eq!(rms_dbfs(&[1e-6; 10]), SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_segments_cover_all_samples() {
        let mut samples = vec![0.01f32; 16_000];
        samples.extend(vec![0.5f32; 8_000]);
        let segments = segment_loudness(&samples, ANALYSIS_SAMPLE_RATE, 1000);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_sec, 0.0);
        assert_eq!(segments[0].duration_sec, 1.0);
        assert_eq!(segments[1].start_sec, 1.0);
        assert_eq!(segments[1].duration_sec, 0.5);
        assert!((segments[0].rms_db - (-40.0)).abs() < 1e-3);
        assert!(segments[1].rms_db > segments[0].rms_db);
    }

    #[test]
    fn test_degenerate_segmentation() {
        assert!(segment_loudness(&[0.1; 10], 0, 1000).is_empty());
        assert!(segment_loudness(&[0.1; 10], 16_000, 0).is_empty());
        assert!(segment_loudness(&[], 16_000, 1000).is_empty());
    }

    #[test]
    fn test_load_valid_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audio.wav");
        write_wav(&path, 16_000, 1, &[0, 16384, -16384, 32767]);

        let samples = load_wav_samples(&path).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -0.5);
    }

    #[test]
    fn test_load_wav_rejects_wrong_format() {
        let dir = TempDir::new().unwrap();
        let stereo = dir.path().join("stereo.wav");
        write_wav(&stereo, 16_000, 2, &[0, 0]);
        assert!(load_wav_samples(&stereo).is_err());

        let rate = dir.path().join("rate.wav");
        write_wav(&rate, 44_100, 1, &[0]);
        assert!(load_wav_samples(&rate).is_err());

        assert!(load_wav_samples(&dir.path().join("missing.wav")).is_err());
    }
}
