use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::Path;

use crate::error::{Classify, ErrorClass};

/// Byte store keyed by object path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download `key` into `dest`, creating or truncating the file.
    async fn get(&self, key: &str, dest: &Path) -> Result<(), StorageError>;

    /// Upload the file at `src` under `key`.
    async fn put(&self, key: &str, src: &Path) -> Result<(), StorageError>;
}

/// Client for S3 or an S3-compatible object store.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> Result<Self, StorageError> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(e.to_string()))?,
        };

        let credentials = Credentials::new(access_key, secret_key, None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if endpoint.is_some() {
            bucket.set_path_style();
        }

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, response.bytes()).await?;
        Ok(())
    }

    async fn put(&self, key: &str, src: &Path) -> Result<(), StorageError> {
        let data = tokio::fs::read(src).await?;
        let content_type = content_type_for(src);

        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(StorageError::S3)?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status,
            });
        }
        Ok(())
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match image::ImageFormat::from_path(path) {
        Ok(format) => format.to_mime_type(),
        Err(_) => "application/octet-stream",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store returned status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            StorageError::Config(_) => ErrorClass::Configuration,
            // Wrong bucket or credentials will not heal on redelivery
            StorageError::Status { status, .. } if matches!(status, 401 | 403) => {
                ErrorClass::Configuration
            }
            StorageError::Status { status: 404, .. } => ErrorClass::Data,
            _ => ErrorClass::Transient,
        }
    }
}
