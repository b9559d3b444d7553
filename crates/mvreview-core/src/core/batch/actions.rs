//! Violation Actions
//!
//! Moves violating videos into the violation directory, or records where they
//! would go on a dry run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::fs::{lossy_path, move_into_dir, unique_destination_excluding};

/// What happened to a violating video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionRecord {
    Moved {
        #[serde(with = "lossy_path")]
        destination: PathBuf,
    },
    WouldMove {
        #[serde(with = "lossy_path")]
        destination: PathBuf,
    },
    /// The move failed; the verdict still stands
    Failed { reason: String },
}

impl ActionRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionRecord::Failed { .. })
    }
}

/// Dry-run destinations handed out during one run.
///
/// Videos are planned in report order, so two violating videos sharing a file
/// name get `name.ext` and `name_1.ext` exactly as a real run moving them in
/// that order would.
#[derive(Debug, Default)]
pub struct DryRunPlan {
    reserved: HashSet<PathBuf>,
}

impl DryRunPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where `video` would be moved. Touches nothing on disk.
    pub fn plan(&mut self, video: &Path, violation_dir: &Path) -> ActionRecord {
        let file_name = video
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let destination = unique_destination_excluding(violation_dir, &file_name, |p| {
            self.reserved.contains(p)
        });
        self.reserved.insert(destination.clone());
        info!(
            "[dry run] would move {} -> {}",
            video.display(),
            destination.display()
        );
        ActionRecord::WouldMove { destination }
    }
}

/// Moves `video` into `violation_dir`.
///
/// Never overwrites an existing file in `violation_dir`. Failures are returned
/// as [`ActionRecord::Failed`] rather than as errors.
pub async fn apply_action(video: &Path, violation_dir: &Path) -> ActionRecord {
    let src = video.to_path_buf();
    let dir = violation_dir.to_path_buf();
    let moved = tokio::task::spawn_blocking(move || move_into_dir(&src, &dir)).await;

    match moved {
        Ok(Ok(destination)) => {
            info!("Moved {} -> {}", video.display(), destination.display());
            ActionRecord::Moved { destination }
        }
        Ok(Err(e)) => {
            warn!("Failed to move {}: {}", video.display(), e);
            ActionRecord::Failed {
                reason: e.to_string(),
            }
        }
        Err(e) => {
            warn!("Move task for {} failed: {}", video.display(), e);
            ActionRecord::Failed {
                reason: format!("move task failed: {}", e),
            }
        }
    }
}
