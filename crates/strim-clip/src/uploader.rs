use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Result of publishing one encoded clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedClip {
    pub url: String,
    pub detail: String,
}

/// Publishes an encoded artifact to the destination platform.
///
/// Implementations are swappable without touching the worker; the reference
/// implementation archives locally and returns a deterministic URL.
#[async_trait]
pub trait ClipUploader: Send + Sync {
    async fn publish(&self, clip_id: &str, path: &Path) -> Result<PublishedClip>;
}

/// Deterministic local-archive placeholder uploader.
pub struct LocalArchiveUploader {
    archive_dir: PathBuf,
    base_url: String,
}

impl LocalArchiveUploader {
    pub fn new(archive_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ClipUploader for LocalArchiveUploader {
    async fn publish(&self, clip_id: &str, path: &Path) -> Result<PublishedClip> {
        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .with_context(|| format!("failed to create {}", self.archive_dir.display()))?;
        let destination = self.archive_dir.join(format!("{clip_id}.mp4"));
        tokio::fs::copy(path, &destination)
            .await
            .with_context(|| format!("failed to archive {}", path.display()))?;
        Ok(PublishedClip {
            url: format!("{}/{clip_id}.mp4", self.base_url.trim_end_matches('/')),
            detail: format!("archived to {}", destination.display()),
        })
    }
}
