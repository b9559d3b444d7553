//! Filesystem utilities.
//!
//! Crash-tolerant report writes and non-overwriting file moves used by batch
//! actions.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Atomic Writes
// =============================================================================

/// Writes bytes to `path` through a temporary sibling and a rename, so readers
/// never observe a partially written file.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = sibling_with_suffix(path, "tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    replace_with(path, &tmp_path)
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| suffix.to_string());
    path.with_file_name(format!("{file_name}.{suffix}"))
}

fn replace_with(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    if !dest.exists() {
        std::fs::rename(src_tmp, dest)?;
        return Ok(());
    }

    // Windows may refuse rename-over-existing; swap through a backup.
    let bak = sibling_with_suffix(dest, "bak");
    if bak.exists() {
        let _ = std::fs::remove_file(&bak);
    }

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(CoreError::IoError(e))
        }
    }
}

// =============================================================================
// Moves
// =============================================================================

/// Makes sure `dir` exists and is a directory, creating it if needed.
pub fn ensure_directory(dir: &Path) -> CoreResult<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(CoreError::ViolationDirUnusable {
            path: dir.to_path_buf(),
            reason: "path exists and is not a directory".to_string(),
        });
    }
    std::fs::create_dir_all(dir).map_err(|e| CoreError::ViolationDirUnusable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Destinations tried for `file_name` in `dir`, in order: the name itself,
/// then `_1`, `_2`, ... appended before the extension.
fn destination_candidates(dir: &Path, file_name: &str) -> impl Iterator<Item = PathBuf> {
    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let first = dir.join(file_name);
    let dir = dir.to_path_buf();
    std::iter::once(first).chain((1u32..).map(move |n| dir.join(format!("{stem}_{n}{ext}"))))
}

/// Returns the first path in `dir` named after `file_name` that does not exist
/// yet, appending `_1`, `_2`, ... before the extension on collision.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    unique_destination_excluding(dir, file_name, |_| false)
}

/// Like [`unique_destination`], also skipping paths for which `taken` holds.
pub fn unique_destination_excluding(
    dir: &Path,
    file_name: &str,
    taken: impl Fn(&Path) -> bool,
) -> PathBuf {
    destination_candidates(dir, file_name)
        .find(|candidate| !candidate.exists() && !taken(candidate.as_path()))
        .unwrap_or_else(|| dir.join(file_name))
}

/// Moves `src` into `dir` without overwriting anything.
///
/// Each candidate name is claimed atomically (hard link, or an exclusive
/// create for the cross-filesystem copy), so concurrent moves of files sharing
/// a name always end up at distinct destinations. Returns the final path.
pub fn move_into_dir(src: &Path, dir: &Path) -> CoreResult<PathBuf> {
    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| CoreError::ActionFailed {
            path: src.to_path_buf(),
            reason: "source path has no file name".to_string(),
        })?;

    if !src.is_file() {
        return Err(CoreError::FileNotFound(src.to_path_buf()));
    }

    std::fs::create_dir_all(dir)?;
    for dest in destination_candidates(dir, &file_name) {
        match claim_destination(src, &dest) {
            Ok(()) => return Ok(dest),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(CoreError::IoError(e)),
        }
    }

    Err(CoreError::ActionFailed {
        path: src.to_path_buf(),
        reason: format!("no free destination name in {}", dir.display()),
    })
}

/// Moves `src` to `dest`, failing with `AlreadyExists` if `dest` is taken.
fn claim_destination(src: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::hard_link(src, dest) {
        Ok(()) => return remove_source(src, dest),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(e),
        // Other filesystem or no link support
        Err(_) => {}
    }

    copy_to_new(src, dest)?;
    remove_source(src, dest)
}

/// Removes `src` once `dest` holds the file; on failure leaves only `src`.
fn remove_source(src: &Path, dest: &Path) -> io::Result<()> {
    if let Err(e) = std::fs::remove_file(src) {
        let _ = std::fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

/// Copies `src` into a file created exclusively at `dest`.
fn copy_to_new(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)?;

    let copied = io::copy(&mut input, &mut output).and_then(|_| {
        if let Ok(meta) = input.metadata() {
            let _ = output.set_permissions(meta.permissions());
        }
        output.sync_all()
    });
    if let Err(e) = copied {
        drop(output);
        let _ = std::fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

// =============================================================================
// Report Paths
// =============================================================================

/// Serializes a path as UTF-8, replacing invalid sequences, so one oddly named
/// file cannot make a report unwritable. Use with `#[serde(with = "...")]`.
pub mod lossy_path {
    use std::path::{Path, PathBuf};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&path.to_string_lossy())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        PathBuf::deserialize(deserializer)
    }
}

/// [`lossy_path`] for a list of paths.
pub mod lossy_paths {
    use std::path::PathBuf;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(paths: &[PathBuf], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(paths.iter().map(|p| p.to_string_lossy()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<PathBuf>, D::Error> {
        Vec::<PathBuf>::deserialize(deserializer)
    }
}
