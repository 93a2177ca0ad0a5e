// src/persistence/storage.rs
//
// Clip upload target. The shipped implementation copies clips into a dated
// folder (`yymmdd`) under a shared root and derives a link from a public
// base URL for that root.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("clip not found: {0}")]
    MissingClip(PathBuf),

    #[error("storage I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ClipStorage: Send + Sync {
    /// Upload `local` as `filename` for the given day; returns a shareable link.
    async fn upload(
        &self,
        local: &Path,
        filename: &str,
        day: NaiveDate,
    ) -> Result<String, StorageError>;
}

pub struct DirectoryStorage {
    root: PathBuf,
    link_base: String,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>, link_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            link_base: link_base.into(),
        }
    }

    pub fn link_for(&self, filename: &str, day: NaiveDate) -> String {
        format!(
            "{}/{}/{}",
            self.link_base.trim_end_matches('/'),
            day.format("%y%m%d"),
            filename
        )
    }
}

#[async_trait]
impl ClipStorage for DirectoryStorage {
    async fn upload(
        &self,
        local: &Path,
        filename: &str,
        day: NaiveDate,
    ) -> Result<String, StorageError> {
        if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            return Err(StorageError::MissingClip(local.to_path_buf()));
        }

        let folder = self.root.join(day.format("%y%m%d").to_string());
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|source| StorageError::Io {
                path: folder.clone(),
                source,
            })?;

        let target = folder.join(filename);
        tokio::fs::copy(local, &target)
            .await
            .map_err(|source| StorageError::Io {
                path: target.clone(),
                source,
            })?;

        debug!("Uploaded {} → {}", local.display(), target.display());
        Ok(self.link_for(filename, day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_into_dated_folder() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("a.mp4");
        std::fs::write(&clip, b"mp4").unwrap();

        let storage = DirectoryStorage::new(dir.path().join("share"), "https://files.farm/clips/");
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let link = storage.upload(&clip, "a.mp4", day).await.unwrap();

        assert_eq!(link, "https://files.farm/clips/250601/a.mp4");
        assert!(dir.path().join("share/250601/a.mp4").exists());
        assert!(clip.exists(), "upload never removes the local clip");
    }

    #[tokio::test]
    async fn test_missing_clip_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path(), "x");
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let err = storage
            .upload(&dir.path().join("none.mp4"), "none.mp4", day)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingClip(_)));
    }
}
