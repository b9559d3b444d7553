//! Batch Runner
//!
//! Reviews a set of videos on a bounded worker pool. Results come back in
//! enumeration order; cancellation stops new videos from starting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::actions::{apply_action, DryRunPlan};
use super::enumerate::enumerate_videos;
use super::report::BatchReport;
use crate::core::config::ReviewConfig;
use crate::core::fs::ensure_directory;
use crate::core::review::{ReviewEngine, ReviewResult, RuleErrorKind};
use crate::core::{CoreError, CoreResult};

/// Batch-level settings
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub violation_dir: PathBuf,
    pub dry_run: bool,
    pub workers: usize,
    pub recursive: bool,
    pub extensions: Vec<String>,
}

impl BatchOptions {
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            violation_dir: config.batch.violation_dir.clone(),
            dry_run: config.batch.dry_run,
            workers: config.worker_count(),
            recursive: config.batch.recursive,
            extensions: config.batch.extensions.clone(),
        }
    }
}

enum Processed {
    Reviewed(ReviewResult),
    Cancelled(PathBuf),
}

/// Drives the review engine over many videos
pub struct BatchRunner {
    engine: Arc<ReviewEngine>,
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(engine: Arc<ReviewEngine>, options: BatchOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Reviews every video under `input`.
    ///
    /// Fails before touching any video when the input is missing or the
    /// violation directory cannot be used.
    pub async fn run(&self, input: &Path, cancel: &CancellationToken) -> CoreResult<BatchReport> {
        self.prepare_violation_dir()?;

        let videos = enumerate_videos(
            input,
            &self.options.extensions,
            self.options.recursive,
            Some(&self.options.violation_dir),
        )?;
        info!(
            "Found {} video(s) under {} ({} worker(s), rules: {})",
            videos.len(),
            input.display(),
            self.options.workers,
            self.engine.enabled_rule_names().join(", ")
        );

        Ok(self.run_videos(videos, cancel).await)
    }

    /// Reviews an explicit list of videos, preserving its order
    pub async fn run_videos(&self, videos: Vec<PathBuf>, cancel: &CancellationToken) -> BatchReport {
        let mut report = BatchReport::begin(self.options.dry_run);
        let mut plan = DryRunPlan::new();
        let workers = self.options.workers.max(1);

        let mut processed = stream::iter(videos)
            .map(|path| self.process(path, cancel.clone()))
            .buffered(workers);

        while let Some(item) = processed.next().await {
            match item {
                Processed::Reviewed(mut result) => {
                    if self.options.dry_run && result.is_violation {
                        result.action =
                            Some(plan.plan(&result.video_path, &self.options.violation_dir));
                    }
                    report.push(result)
                }
                Processed::Cancelled(path) => report.push_cancelled(path),
            }
        }

        if report.summary.cancelled > 0 {
            warn!(
                "Run cancelled: {} video(s) not reviewed",
                report.summary.cancelled
            );
        }
        report.finish();
        report
    }

    fn prepare_violation_dir(&self) -> CoreResult<()> {
        let dir = &self.options.violation_dir;
        if !self.options.dry_run {
            return ensure_directory(dir);
        }
        if dir.exists() && !dir.is_dir() {
            return Err(CoreError::ViolationDirUnusable {
                path: dir.clone(),
                reason: "exists and is not a directory".into(),
            });
        }
        Ok(())
    }

    async fn process(&self, path: PathBuf, cancel: CancellationToken) -> Processed {
        if cancel.is_cancelled() {
            return Processed::Cancelled(path);
        }

        let engine = Arc::clone(&self.engine);
        let violation_dir = self.options.violation_dir.clone();
        let dry_run = self.options.dry_run;
        let task_path = path.clone();

        // The move runs inside the task so an in-flight video always finishes it
        let handle = tokio::spawn(async move {
            let mut result = engine.review(&task_path).await;
            if result.is_violation && !dry_run {
                result.action = Some(apply_action(&task_path, &violation_dir).await);
            }
            result
        });

        match handle.await {
            Ok(result) => Processed::Reviewed(result),
            Err(e) => {
                error!("Review task for {} failed: {}", path.display(), e);
                Processed::Reviewed(self.engine.errored_result(
                    &path,
                    RuleErrorKind::Internal,
                    &format!("review task failed: {}", e),
                    Duration::ZERO,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;

    use super::*;
    use crate::core::batch::ActionRecord;
    use crate::core::config::VolumeRuleConfig;
    use crate::core::review::rules::VolumeRule;
    use crate::core::review::{
        ExtractionOptions, LoudnessSegment, MediaSignals, MediaSource, Rule,
    };
    use tempfile::TempDir;

    /// Files whose name starts with "loud" get a volume spike; "broken" fails
    struct NamedMedia {
        cancel_on_extract: Option<CancellationToken>,
    }

    #[async_trait]
    impl MediaSource for NamedMedia {
        async fn extract(
            &self,
            path: &Path,
            _options: &ExtractionOptions,
        ) -> CoreResult<MediaSignals> {
            if let Some(token) = &self.cancel_on_extract {
                token.cancel();
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.starts_with("broken") {
                return Err(CoreError::VideoProcessing {
                    path: path.to_path_buf(),
                    reason: "probe failed".into(),
                });
            }
            let levels: &[f64] = if name.starts_with("loud") {
                &[-30.0, -5.0]
            } else {
                &[-20.0, -21.0]
            };
            Ok(MediaSignals {
                loudness: levels
                    .iter()
                    .enumerate()
                    .map(|(i, &db)| LoudnessSegment {
                        start_sec: i as f64,
                        duration_sec: 1.0,
                        rms_db: db,
                    })
                    .collect(),
                ..Default::default()
            })
        }
    }

    fn runner(dir: &Path, dry_run: bool, workers: usize, media: NamedMedia) -> BatchRunner {
        let engine = ReviewEngine::new(
            vec![Rule::Volume(VolumeRule::new(VolumeRuleConfig::default()))],
            Arc::new(media),
        );
        BatchRunner::new(
            Arc::new(engine),
            BatchOptions {
                violation_dir: dir.join("violations"),
                dry_run,
                workers,
                recursive: false,
                extensions: vec!["mp4".into()],
            },
        )
    }

    fn seed(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
    }

    fn names(report: &BatchReport) -> Vec<String> {
        report
            .results
            .iter()
            .map(|r| r.video_path.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_batch_moves_violations_in_order() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), &["a.mp4", "broken.mp4", "loud1.mp4", "loud2.mp4", "z.mp4"]);

        let runner = runner(dir.path(), false, 3, NamedMedia { cancel_on_extract: None });
        let report = runner
            .run(dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            names(&report),
            vec!["a.mp4", "broken.mp4", "loud1.mp4", "loud2.mp4", "z.mp4"]
        );
        assert_eq!(report.summary.violated, 2);
        assert_eq!(report.summary.errored, 1);
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.exit_code(), 1);

        let violations = dir.path().join("violations");
        assert!(violations.join("loud1.mp4").exists());
        assert!(violations.join("loud2.mp4").exists());
        assert!(!dir.path().join("loud1.mp4").exists());
        assert!(dir.path().join("a.mp4").exists());
        assert_eq!(
            report.results[2].action,
            Some(ActionRecord::Moved {
                destination: violations.join("loud1.mp4")
            })
        );
        assert!(report.results[0].action.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_is_repeatable() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), &["a.mp4", "loud.mp4"]);
        let runner = runner(dir.path(), true, 2, NamedMedia { cancel_on_extract: None });

        let first = runner.run(dir.path(), &CancellationToken::new()).await.unwrap();
        let second = runner.run(dir.path(), &CancellationToken::new()).await.unwrap();

        assert!(dir.path().join("loud.mp4").exists());
        assert!(!dir.path().join("violations").exists());
        assert_eq!(first.results[1].action, second.results[1].action);
        assert!(matches!(
            first.results[1].action,
            Some(ActionRecord::WouldMove { .. })
        ));
    }

    #[tokio::test]
    async fn test_unusable_violation_dir_fails_before_review() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), &["loud.mp4"]);
        std::fs::write(dir.path().join("violations"), b"not a dir").unwrap();

        let runner = runner(dir.path(), false, 1, NamedMedia { cancel_on_extract: None });
        let err = runner.run(dir.path(), &CancellationToken::new()).await;
        assert!(matches!(err, Err(CoreError::ViolationDirUnusable { .. })));
        assert!(dir.path().join("loud.mp4").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reviews_nothing() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), &["a.mp4", "b.mp4"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let runner = runner(dir.path(), false, 2, NamedMedia { cancel_on_extract: None });
        let report = runner.run(dir.path(), &cancel).await.unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.summary.cancelled, 2);
        assert_eq!(report.not_reviewed.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_in_flight_video() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), &["loud.mp4", "m.mp4", "n.mp4"]);
        let cancel = CancellationToken::new();

        let runner = runner(
            dir.path(),
            false,
            1,
            NamedMedia {
                cancel_on_extract: Some(cancel.clone()),
            },
        );
        let report = runner.run(dir.path(), &cancel).await.unwrap();

        assert_eq!(names(&report), vec!["loud.mp4"]);
        assert!(dir.path().join("violations").join("loud.mp4").exists());
        let skipped: HashSet<_> = report.not_reviewed.iter().collect();
        assert_eq!(skipped.len(), 2);
        assert_eq!(report.summary.cancelled, 2);
    }

    fn recursive_runner(dir: &Path, dry_run: bool) -> BatchRunner {
        let base = runner(dir, dry_run, 4, NamedMedia { cancel_on_extract: None });
        BatchRunner::new(
            Arc::clone(&base.engine),
            BatchOptions {
                recursive: true,
                ..base.options.clone()
            },
        )
    }

    fn seed_shared_names(dir: &Path) {
        for sub in ["s1", "s2"] {
            std::fs::create_dir_all(dir.join(sub)).unwrap();
            std::fs::write(dir.join(sub).join("loud.mp4"), sub.as_bytes()).unwrap();
        }
    }

    fn destinations(report: &BatchReport) -> Vec<PathBuf> {
        report
            .results
            .iter()
            .filter_map(|r| match &r.action {
                Some(ActionRecord::Moved { destination })
                | Some(ActionRecord::WouldMove { destination }) => Some(destination.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dry_run_plans_shared_names_like_a_real_run() {
        let dir = TempDir::new().unwrap();
        seed_shared_names(dir.path());

        let report = recursive_runner(dir.path(), true)
            .run(dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        let violations = dir.path().join("violations");
        assert_eq!(
            destinations(&report),
            vec![violations.join("loud.mp4"), violations.join("loud_1.mp4")]
        );
    }

    #[tokio::test]
    async fn test_moves_of_shared_names_keep_both_videos() {
        let dir = TempDir::new().unwrap();
        seed_shared_names(dir.path());

        let report = recursive_runner(dir.path(), false)
            .run(dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        let moved = destinations(&report);
        assert_eq!(moved.len(), 2);
        assert_ne!(moved[0], moved[1]);
        let mut contents: Vec<String> = moved
            .iter()
            .map(|d| std::fs::read_to_string(d).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["s1", "s2"]);
    }
}
