//! Batch Report
//!
//! Accumulates per-video results into the run report and persists it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::fs::atomic_write_json_pretty;
use crate::core::review::{ReviewResult, Violation};
use crate::core::{CoreResult, RuleId};

fn report_numbers(violation: &Violation) -> Vec<RuleId> {
    let numbers: Vec<RuleId> = violation
        .details
        .get("categories")
        .and_then(|c| c.as_array())
        .map(|categories| {
            categories
                .iter()
                .filter_map(|c| c.get("report_number")?.as_u64())
                .map(|n| n as RuleId)
                .collect()
        })
        .unwrap_or_default();
    if numbers.is_empty() {
        vec![violation.rule_id]
    } else {
        numbers
    }
}

/// Human-readable name of a report number
pub fn report_label(number: RuleId) -> &'static str {
    match number {
        1 => "lyricist/composer",
        2 => "portrait/black borders",
        3 => "sudden volume change",
        4 => "exposure/inappropriate",
        5 => "landscape only",
        6 => "advertisement",
        7 => "drug use",
        _ => "unknown",
    }
}

/// Counts over a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub violated: usize,
    /// Videos without violations where at least one rule errored
    pub errored: usize,
    /// Videos not started before cancellation
    pub cancelled: usize,
    /// Violating videos whose move failed
    pub action_failures: usize,
    /// Videos violating each report number (1-7); content violations count
    /// under their category numbers
    pub violations_by_rule: BTreeMap<RuleId, usize>,
}

impl BatchSummary {
    fn record(&mut self, result: &ReviewResult) {
        self.total += 1;
        if result.is_violation {
            self.violated += 1;
        } else if result.has_errors() {
            self.errored += 1;
        } else {
            self.passed += 1;
        }
        if result.action.as_ref().is_some_and(|a| a.is_failure()) {
            self.action_failures += 1;
        }
        let mut numbers: Vec<RuleId> = result.violations.iter().flat_map(report_numbers).collect();
        numbers.sort_unstable();
        numbers.dedup();
        for n in numbers {
            *self.violations_by_rule.entry(n).or_insert(0) += 1;
        }
    }
}

/// Full report of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    /// In input enumeration order
    pub results: Vec<ReviewResult>,
    /// Videos skipped because the run was cancelled
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "crate::core::fs::lossy_paths"
    )]
    pub not_reviewed: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub dry_run: bool,
}

impl BatchReport {
    /// Starts an empty report
    pub fn begin(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            summary: BatchSummary::default(),
            results: Vec::new(),
            not_reviewed: Vec::new(),
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
            dry_run,
        }
    }

    /// Folds one reviewed video into the report
    pub fn push(&mut self, result: ReviewResult) {
        self.summary.record(&result);
        self.results.push(result);
    }

    /// Records a video that was never started
    pub fn push_cancelled(&mut self, path: PathBuf) {
        self.summary.cancelled += 1;
        self.not_reviewed.push(path);
    }

    /// Stamps the finish time
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.elapsed_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }

    /// Mean review time per reviewed video
    pub fn average_review_ms(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.results.iter().map(|r| r.review_duration_ms).sum();
        sum as f64 / self.results.len() as f64
    }

    /// One-line summary for logs
    pub fn summary_line(&self) -> String {
        let s = &self.summary;
        let per_rule = s
            .violations_by_rule
            .iter()
            .map(|(id, n)| format!("#{}={}", id, n))
            .collect::<Vec<_>>()
            .join(" ");
        let mut line = format!(
            "{} video(s): {} passed, {} violated, {} errored",
            s.total, s.passed, s.violated, s.errored
        );
        if s.cancelled > 0 {
            line.push_str(&format!(", {} cancelled", s.cancelled));
        }
        if !per_rule.is_empty() {
            line.push_str(&format!(" [{}]", per_rule));
        }
        line.push_str(&format!(
            " in {:.1}s (avg {:.0}ms/video)",
            self.elapsed_ms as f64 / 1000.0,
            self.average_review_ms()
        ));
        if self.dry_run {
            line.push_str(" [dry run]");
        }
        line
    }

    /// Process exit code: 1 on any violation, 2 on errors only, else 0
    pub fn exit_code(&self) -> i32 {
        if self.summary.violated > 0 {
            1
        } else if self.summary.errored > 0 {
            2
        } else {
            0
        }
    }
}

/// Writes the report as pretty JSON, atomically
pub fn write_report(path: &Path, report: &BatchReport) -> CoreResult<()> {
    atomic_write_json_pretty(path, report)
}

/// Reads a report written by [`write_report`]
pub fn read_report(path: &Path) -> CoreResult<BatchReport> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::batch::ActionRecord;
    use crate::core::review::{RuleError, RuleErrorKind, RuleOutcome};
    use serde_json::json;
    use tempfile::TempDir;

    fn result(name: &str, outcomes: Vec<(RuleId, &str, RuleOutcome)>) -> ReviewResult {
        let outcomes = outcomes
            .into_iter()
            .map(|(id, n, o)| (id, n.to_string(), o))
            .collect();
        ReviewResult::from_outcomes(name, outcomes, vec![], Duration::from_millis(10))
    }

    fn violation(id: RuleId, name: &str) -> RuleOutcome {
        RuleOutcome::Violation(Violation::new(id, name, "found", 0.8))
    }

    fn error(id: RuleId, name: &str) -> RuleOutcome {
        RuleOutcome::Error(RuleError::new(id, name, RuleErrorKind::Timeout, "slow"))
    }

    // =========================================================================
    // Summary
    // =========================================================================

    #[test]
    fn test_counts_and_exit_codes() {
        let mut report = BatchReport::begin(false);
        assert_eq!(report.exit_code(), 0);

        report.push(result("a.mp4", vec![(3, "volume", RuleOutcome::pass())]));
        report.push(result("b.mp4", vec![(2, "aspect", error(2, "aspect"))]));
        assert_eq!(report.exit_code(), 2);

        report.push(result(
            "c.mp4",
            vec![
                (2, "aspect", violation(2, "aspect")),
                (3, "volume", violation(3, "volume")),
            ],
        ));
        report.push(result("d.mp4", vec![(3, "volume", violation(3, "volume"))]));
        report.push_cancelled(PathBuf::from("e.mp4"));
        report.finish();

        let s = &report.summary;
        assert_eq!(s.total, 4);
        assert_eq!(s.passed, 1);
        assert_eq!(s.errored, 1);
        assert_eq!(s.violated, 2);
        assert_eq!(s.cancelled, 1);
        assert_eq!(s.violations_by_rule.get(&2), Some(&1));
        assert_eq!(s.violations_by_rule.get(&3), Some(&2));
        assert_eq!(report.exit_code(), 1);

        let line = report.summary_line();
        assert!(line.contains("4 video(s)"));
        assert!(line.contains("#3=2"));
        assert!(line.contains("1 cancelled"));
    }

    #[test]
    fn test_content_violations_count_by_category_number() {
        let content = Violation::new(4, "content", "ads and drugs", 0.9).with_detail(
            "categories",
            json!([
                {"category": "advertisement", "report_number": 6},
                {"category": "drug_use", "report_number": 7}
            ]),
        );
        let mut report = BatchReport::begin(false);
        report.push(result(
            "a.mp4",
            vec![(4, "content", RuleOutcome::Violation(content))],
        ));

        let by_rule = &report.summary.violations_by_rule;
        assert_eq!(by_rule.get(&6), Some(&1));
        assert_eq!(by_rule.get(&7), Some(&1));
        assert_eq!(by_rule.get(&4), None);
    }

    #[test]
    fn test_average_review_time() {
        let mut report = BatchReport::begin(true);
        assert_eq!(report.average_review_ms(), 0.0);
        report.push(result("a.mp4", vec![]));
        assert_eq!(report.average_review_ms(), 10.0);
        assert!(report.summary_line().ends_with("[dry run]"));
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn test_report_round_trip_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        let mut report = BatchReport::begin(false);
        report.push(result(
            "a.mp4",
            vec![
                (
                    2,
                    "aspect",
                    RuleOutcome::Violation(
                        Violation::new(2, "aspect", "borders", 1.0 / 3.0)
                            .with_detail("vertical_total", 0.4567),
                    ),
                ),
                (4, "content", error(4, "content")),
            ],
        ));
        report.finish();

        write_report(&path, &report).unwrap();
        let first = std::fs::read(&path).unwrap();
        let loaded = read_report(&path).unwrap();
        assert_eq!(loaded, report);

        write_report(&path, &loaded).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_file_names_do_not_block_the_report() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let odd = PathBuf::from(OsStr::from_bytes(b"clip\xff.mp4"));

        let mut report = BatchReport::begin(false);
        let mut flagged = result("ok.mp4", vec![(3, "volume", violation(3, "volume"))]);
        flagged.video_path = odd.clone();
        flagged.action = Some(ActionRecord::Moved {
            destination: PathBuf::from("violations").join(&odd),
        });
        report.push(flagged);
        report.push_cancelled(odd);
        report.finish();

        write_report(&path, &report).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("clip\u{FFFD}.mp4"));

        let loaded = read_report(&path).unwrap();
        assert_eq!(loaded.results[0].video_path, PathBuf::from("clip\u{FFFD}.mp4"));
        assert_eq!(loaded.not_reviewed, vec![PathBuf::from("clip\u{FFFD}.mp4")]);
        assert_eq!(
            loaded.results[0].action,
            Some(ActionRecord::Moved {
                destination: PathBuf::from("violations").join("clip\u{FFFD}.mp4")
            })
        );
    }
}
