//! S3-compatible storage backend

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::{extension_for, make_thumbnail, SavedFile, StorageBackend};
use crate::config::StorageConfig;
use crate::error::StorageError;

/// Stores objects in an S3-compatible bucket (AWS, MinIO, R2).
pub struct S3Storage {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
    public_url: Option<String>,
}

impl S3Storage {
    pub async fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("S3 bucket not configured"))?;

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .force_path_style(true); // Required for MinIO and other S3-compatible services

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "spinescan",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => info!("Connected to S3 bucket: {}", bucket),
            Err(e) => warn!(
                "Could not verify bucket {}: {}. Will attempt operations anyway.",
                bucket, e
            ),
        }

        Ok(Self {
            client,
            bucket,
            endpoint: config.endpoint.clone(),
            public_url: config.public_url.clone(),
        })
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", key, e)))?;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
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

        self.put(&storage_path, data.to_vec(), content_type).await?;
        self.put(&thumb_path, thumb, "image/jpeg").await?;

        Ok(SavedFile {
            storage_path,
            thumb_path: Some(thumb_path),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("404") || e.to_string().contains("NoSuchKey") {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    StorageError::SdkError(format!("Failed to get object {}: {}", key, e))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read object {}: {}", key, e)))?;

        Ok(data.into_bytes().to_vec())
    }

    fn public_url(&self, key: &str) -> String {
        if let Some(base) = &self.public_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }
        if let Some(endpoint) = &self.endpoint {
            return format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key);
        }
        format!("https://{}.s3.amazonaws.com/{}", self.bucket, key)
    }
}
