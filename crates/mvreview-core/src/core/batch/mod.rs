//! Batch Processing
//!
//! Enumerates videos, reviews them on a bounded worker pool, applies the
//! configured action to violating videos and accumulates the run report.

pub mod actions;
pub mod enumerate;
pub mod report;
pub mod runner;

// Re-export main types
pub use actions::{apply_action, ActionRecord, DryRunPlan};
pub use enumerate::enumerate_videos;
pub use report::{read_report, report_label, write_report, BatchReport, BatchSummary};
pub use runner::{BatchOptions, BatchRunner};
