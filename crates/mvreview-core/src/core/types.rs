//! Common Type Definitions
//!
//! Shared aliases used across the review pipeline.

/// Time in seconds from the start of a video
pub type TimeSec = f64;

/// Stable rule identifier (1 = metadata, 2 = aspect, 3 = volume, 4 = content)
pub type RuleId = u8;

/// Loudness level in dBFS
pub type Decibels = f64;

/// Confidence score in `[0, 1]`
pub type Confidence = f64;

/// Clamps a confidence value into `[0, 1]`, mapping NaN to zero.
pub fn clamp_confidence(value: f64) -> Confidence {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
