//! ffprobe output parsing

use serde_json::Value;

use crate::core::{CoreError, CoreResult, TimeSec};

/// What a video contains, as displayed
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub duration_sec: TimeSec,
    /// Display width (rotation applied)
    pub width: u32,
    /// Display height (rotation applied)
    pub height: u32,
    pub has_video: bool,
    pub has_audio: bool,
}

impl VideoProbe {
    pub fn has_dimensions(&self) -> bool {
        self.has_video && self.width > 0 && self.height > 0
    }
}

fn stream_rotation(stream: &Value) -> i64 {
    let from_tags = stream
        .get("tags")
        .and_then(|t| t.get("rotate"))
        .and_then(|r| r.as_str())
        .and_then(|s| s.parse::<i64>().ok());

    let from_side_data = stream
        .get("side_data_list")
        .and_then(|l| l.as_array())
        .and_then(|list| {
            list.iter()
                .find_map(|entry| entry.get("rotation").and_then(|r| r.as_i64()))
        });

    from_tags.or(from_side_data).unwrap_or(0)
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_probe_output(json_str: &str) -> CoreResult<VideoProbe> {
    let json: Value = serde_json::from_str(json_str)
        .map_err(|e| CoreError::MediaTool(format!("Failed to parse ffprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| CoreError::MediaTool("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut probe = VideoProbe {
        duration_sec,
        width: 0,
        height: 0,
        has_video: false,
        has_audio: false,
    };

    for stream in &streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            Some("video") if !probe.has_video => {
                // Cover art shows up as a single-frame video stream
                let attached_pic = stream
                    .get("disposition")
                    .and_then(|d| d.get("attached_pic"))
                    .and_then(|a| a.as_i64())
                    == Some(1);
                if attached_pic {
                    continue;
                }
                let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
                let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;
                let (width, height) = if stream_rotation(stream).rem_euclid(180) == 90 {
                    (height, width)
                } else {
                    (width, height)
                };
                probe.has_video = true;
                probe.width = width;
                probe.height = height;
            }
            Some("audio") => probe.has_audio = true,
            _ => {}
        }
    }

    Ok(probe)
}
