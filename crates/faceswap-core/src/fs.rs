//! Filesystem helpers shared by the orchestrator and the probe.

use std::io;
use std::path::{Path, PathBuf};

/// Whether `path` exists. Permission errors count as absent.
pub async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Absolute form of an existing path with symlinks resolved.
pub async fn resolve_existing(path: &Path) -> io::Result<PathBuf> {
    tokio::fs::canonicalize(path).await
}

/// Create `dir` if needed and return its absolute form.
pub async fn ensure_dir(dir: &Path) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::canonicalize(dir).await
}

/// Copy `from` to `to`, leaving `from` untouched.
pub async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::copy(from, to).await.map(|_| ())
}

/// Move `from` to `to`.
///
/// Falls back to copy + remove when a rename is impossible, e.g. when the
/// tool's output directory lives on another filesystem.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %err,
                "rename failed; copying instead"
            );
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_file_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.png");
        let to = dir.path().join("b.png");
        tokio::fs::write(&from, b"\x89PNG data").await.unwrap();

        move_file(&from, &to).await.unwrap();

        assert!(!path_exists(&from).await);
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"\x89PNG data");
    }

    #[tokio::test]
    async fn test_copy_file_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.jpg");
        let to = dir.path().join("b.jpg");
        tokio::fs::write(&from, b"jpeg").await.unwrap();

        copy_file(&from, &to).await.unwrap();

        assert!(path_exists(&from).await);
        assert!(path_exists(&to).await);
    }

    #[tokio::test]
    async fn test_ensure_dir_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("results").join("today");

        let resolved = ensure_dir(&nested).await.unwrap();

        assert!(resolved.is_absolute());
        assert!(path_exists(&resolved).await);
    }
}
