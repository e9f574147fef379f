//! Small helpers shared by the archive, the summarizer and the site writer.

use std::io;
use std::path::{Path, PathBuf};

use rand::{Rng, distr::Alphanumeric, rng};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::error::StorageError;

/// Truncate a string for logging purposes.
///
/// Keeps at most `max` bytes, cut back to a char boundary, and appends how
/// many bytes were dropped.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Keep at most `max` characters, adding an ellipsis when something was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}…", &s[..end]),
        None => s.to_string(),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    let probe = path.join(".__probe_write__");
    fs::write(&probe, b"")
        .await
        .map_err(|e| StorageError::io(&probe, e))?;
    let _ = fs::remove_file(&probe).await;
    info!("Output directory is writable");
    Ok(())
}

/// Write `bytes` to `path` so readers see either the old or the new file.
///
/// The content goes to a hidden temp file in the same directory first and is
/// then renamed over the target. Parent directories are created.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = stage_file(path, bytes).await?;
    commit_staged(&tmp, path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}

/// First half of [`write_atomic`]: write `bytes` next to `path` without
/// touching `path` itself.
///
/// # Returns
///
/// The hidden temp file to hand to [`commit_staged`] or [`discard_staged`].
/// Fails without leaving anything behind when the content cannot be written
/// or when `path` is a directory and could never be replaced.
pub async fn stage_file(path: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;

    if fs::symlink_metadata(path).await.is_ok_and(|meta| meta.is_dir()) {
        return Err(StorageError::io(
            path,
            io::Error::new(io::ErrorKind::IsADirectory, "target is a directory"),
        ));
    }

    let tmp = temp_sibling(path);
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::io(&tmp, e));
    }
    Ok(tmp)
}

/// Second half of [`write_atomic`]: rename a staged file over its target.
pub async fn commit_staged(tmp: &Path, path: &Path) -> Result<(), StorageError> {
    if let Err(e) = fs::rename(tmp, path).await {
        let _ = fs::remove_file(tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// Drop staged files that will not be committed.
pub async fn discard_staged(tmps: impl IntoIterator<Item = &Path>) {
    for tmp in tmps {
        let _ = fs::remove_file(tmp).await;
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{suffix}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        // each CJK char is 3 bytes; 4 falls inside the second one
        let result = truncate_for_log("金融科技", 4);
        assert_eq!(result, "金…(+9 bytes)");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("金融科技新闻", 4), "金融科技…");
        assert_eq!(truncate_chars("abcd", 4), "abcd");
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.json");

        write_atomic(&target, b"first").await.unwrap();
        write_atomic(&target, b"second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b");
        ensure_writable_dir(&path).await.unwrap();
        assert!(path.is_dir());
        assert_eq!(std::fs::read_dir(&path).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stage_file_refuses_directory_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("archives.html");
        std::fs::create_dir(&target).unwrap();

        let err = stage_file(&target, b"page").await.unwrap_err();
        assert!(err.to_string().contains("archives.html"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_staged_file_is_invisible_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index.html");
        std::fs::write(&target, "old").unwrap();

        let tmp = stage_file(&target, b"new").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");

        commit_staged(&tmp, &target).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        assert!(!tmp.exists());
    }
}
