//! Filesystem helpers for sizing inputs and cleaning up outputs.
//!
//! Cleanup is best-effort: a file that is already gone counts as removed,
//! and other failures are logged and reported to the caller without
//! aborting the remaining deletions.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Size of a file in bytes.
pub async fn file_size(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(MediaError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Remove a file, treating "not found" as success.
///
/// Returns `true` when a file was actually deleted.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Remove every path in `outputs`.
///
/// Returns the paths that could not be removed.
pub async fn remove_outputs(outputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut failed = Vec::new();
    for output in outputs {
        match remove_if_exists(output).await {
            Ok(true) => {
                tracing::info!("Cleaned up output: {}", output.display());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to clean up output {}: {}", output.display(), e);
                failed.push(output.clone());
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_file_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.mp4");
        fs::write(&path, b"0123456789").await.unwrap();

        assert_eq!(file_size(&path).await.unwrap(), 10);
        let missing = file_size(dir.path().join("missing.mp4")).await;
        assert!(matches!(missing, Err(MediaError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_if_exists_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.webm");
        fs::write(&path, b"partial").await.unwrap();

        assert!(assert_ok!(remove_if_exists(&path).await));
        assert!(!path.exists());
        assert!(!assert_ok!(remove_if_exists(&path).await));
    }

    #[tokio::test]
    async fn test_remove_if_exists_reports_other_errors() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be removed with remove_file.
        assert_err!(remove_if_exists(dir.path()).await);
    }

    #[tokio::test]
    async fn test_remove_outputs_mixed() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("a.mp4");
        let absent = dir.path().join("b.webm");
        let undeletable = dir.path().join("sub");
        fs::write(&present, b"x").await.unwrap();
        fs::create_dir(&undeletable).await.unwrap();

        let failed = remove_outputs(&[present.clone(), absent, undeletable.clone()]).await;

        assert!(!present.exists());
        assert_eq!(failed, vec![undeletable]);
    }
}
