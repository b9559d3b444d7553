//! Chromaprint (`fpcalc`) output parsing

use serde::Deserialize;

use crate::core::review::AudioSample;
use crate::core::{CoreError, CoreResult};

#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    duration: f64,
    fingerprint: String,
}

/// Parses `fpcalc -json` output into an audio sample
pub fn parse_fpcalc_output(json_str: &str) -> CoreResult<AudioSample> {
    let parsed: FpcalcOutput = serde_json::from_str(json_str.trim())
        .map_err(|e| CoreError::MediaTool(format!("Failed to parse fpcalc output: {}", e)))?;

    if parsed.fingerprint.is_empty() {
        return Err(CoreError::MediaTool("fpcalc produced an empty fingerprint".into()));
    }

    Ok(AudioSample {
        fingerprint: parsed.fingerprint,
        duration_sec: parsed.duration.max(0.0).round() as u32,
    })
}
