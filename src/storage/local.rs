//! Local filesystem storage

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{extension_for, make_thumbnail, SavedFile, StorageBackend};
use crate::error::StorageError;

/// Stores originals and thumbnails under a root directory on disk.
///
/// Keys are relative paths (`originals/<uuid>.<ext>`), so the same image
/// rows work if the deployment later moves to S3.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(root.join("originals")).await?;
        tokio::fs::create_dir_all(root.join("thumbs")).await?;
        info!("Local storage at {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn save(
        &self,
        data: &[u8],
        original_name: &str,
        content_type: &str,
    ) -> Result<SavedFile, StorageError> {
        let thumb = make_thumbnail(data)?;

        let id = Uuid::new_v4();
        let ext = extension_for(original_name, content_type);
        let storage_path = format!("originals/{}.{}", id, ext);
        let thumb_path = format!("thumbs/{}.jpg", id);

        tokio::fs::write(self.root.join(&storage_path), data)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        tokio::fs::write(self.root.join(&thumb_path), &thumb)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(SavedFile {
            storage_path,
            thumb_path: Some(thumb_path),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.root.join(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("/uploads/{}", key)
    }
}
