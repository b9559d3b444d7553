//! mvreview Core Engine
//!
//! Review engine, rules, media extraction, external service adapters and
//! batch processing.

pub mod batch;
pub mod config;
pub mod fs;
pub mod media;
pub mod process;
pub mod review;
pub mod services;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
