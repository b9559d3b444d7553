//! Video Enumeration

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::core::{CoreError, CoreResult};

fn has_video_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

/// Lists the videos to review under `input`, sorted by path.
///
/// A file input is returned as-is. Directories are scanned one level deep
/// unless `recursive`; anything under `exclude` (the violation directory) is
/// skipped.
pub fn enumerate_videos(
    input: &Path,
    extensions: &[String],
    recursive: bool,
    exclude: Option<&Path>,
) -> CoreResult<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(CoreError::DirectoryNotFound(input.to_path_buf()));
    }

    let exclude = exclude.and_then(|p| std::fs::canonicalize(p).ok());
    let walker = WalkDir::new(input)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(false);

    let mut videos = Vec::new();
    for entry in walker.into_iter().filter_entry(|e| {
        match (&exclude, std::fs::canonicalize(e.path())) {
            (Some(ex), Ok(p)) => &p != ex,
            _ => true,
        }
    }) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && has_video_extension(entry.path(), extensions) {
            videos.push(entry.into_path());
        }
    }

    videos.sort();
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DEFAULT_VIDEO_EXTENSIONS;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.mp4"));
        touch(&dir.path().join("a.MKV"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("sub").join("c.ts"));

        let videos = enumerate_videos(dir.path(), &exts(), false, None).unwrap();
        let names: Vec<String> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.MKV", "b.mp4"]);
    }

    #[test]
    fn test_recursive_skips_violation_dir() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("sub").join("c.ts"));
        touch(&dir.path().join("violations").join("moved.mp4"));

        let violations = dir.path().join("violations");
        let videos = enumerate_videos(dir.path(), &exts(), true, Some(&violations)).unwrap();
        assert_eq!(
            videos,
            vec![dir.path().join("a.mp4"), dir.path().join("sub").join("c.ts")]
        );
    }

    #[test]
    fn test_single_file_input() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.mov");
        touch(&file);
        assert_eq!(
            enumerate_videos(&file, &exts(), false, None).unwrap(),
            vec![file]
        );
    }

    #[test]
    fn test_missing_input() {
        let err = enumerate_videos(Path::new("/nonexistent/dir"), &exts(), false, None);
        assert!(matches!(err, Err(CoreError::DirectoryNotFound(_))));
    }
}
