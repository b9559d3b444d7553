//! mvreview core library
//!
//! Rule-based review of music videos: precomputed media signals are checked
//! by independent rules, aggregated into a verdict, and acted on in batches.

pub mod core;

pub use crate::core::{CoreError, CoreResult};
