//! Upload storage backends
//!
//! Uploaded spine photos are written as an original plus a downscaled
//! thumbnail. The queue executor reads originals back by key; thumbnails
//! only exist for the browser.

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

use std::io::Cursor;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use image::ImageFormat;

use crate::config::{StorageConfig, StorageDriver};
use crate::error::StorageError;

const THUMB_MAX_DIM: u32 = 512;

/// Keys under which one upload was stored.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub storage_path: String,
    pub thumb_path: Option<String>,
}

/// Async trait implemented by each storage backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist the original and its thumbnail, returning their keys.
    async fn save(
        &self,
        data: &[u8],
        original_name: &str,
        content_type: &str,
    ) -> Result<SavedFile, StorageError>;

    /// Read an object back by key.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// URL at which the browser can load the object.
    fn public_url(&self, key: &str) -> String;
}

/// Build the configured backend.
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.driver {
        StorageDriver::Local => Ok(Arc::new(LocalStorage::new(&config.local_dir).await?)),
        StorageDriver::S3 => {
            if config.bucket.is_none() {
                bail!("S3_BUCKET is required when using s3 storage");
            }
            Ok(Arc::new(S3Storage::new(config).await?))
        }
    }
}

/// Decode the upload and render a bounded-size JPEG thumbnail.
///
/// Doubles as upload validation: data the `image` crate cannot decode is
/// rejected before anything is persisted.
pub(crate) fn make_thumbnail(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let img = image::load_from_memory(data)
        .map_err(|e| StorageError::InvalidImage(format!("Failed to decode image: {}", e)))?;

    let thumb = img.thumbnail(THUMB_MAX_DIM, THUMB_MAX_DIM);
    let mut out = Cursor::new(Vec::new());
    thumb
        .to_rgb8()
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| StorageError::InvalidImage(format!("Failed to encode thumbnail: {}", e)))?;

    Ok(out.into_inner())
}

pub(crate) fn extension_for(original_name: &str, content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/jpeg" => "jpg",
        _ => match original_name.rsplit('.').next() {
            Some("png") => "png",
            Some("webp") => "webp",
            _ => "jpg",
        },
    }
}

/// In-memory backend for tests.
#[cfg(test)]
pub struct MemoryStorage {
    objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn put(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }
}

#[cfg(test)]
#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save(
        &self,
        data: &[u8],
        _original_name: &str,
        _content_type: &str,
    ) -> Result<SavedFile, StorageError> {
        let key = format!("originals/{}.jpg", uuid::Uuid::new_v4());
        self.put(&key, data.to_vec());
        Ok(SavedFile {
            storage_path: key,
            thumb_path: None,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
