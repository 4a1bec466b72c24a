mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::{build_client, S3Storage};

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::{AppConfig, StorageBackend};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable byte storage addressed by an opaque key (the blob locator stored
/// on each document row).
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()>;

    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Publicly reachable URL for the object, when the backend has one.
    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }
}

pub async fn build_storage(config: &AppConfig) -> anyhow::Result<Arc<dyn ObjectStorage>> {
    match config.storage_backend {
        StorageBackend::Local => {
            let storage = LocalStorage::new(&config.local_storage_path).with_context(|| {
                format!(
                    "failed to prepare local storage at {}",
                    config.local_storage_path
                )
            })?;
            Ok(Arc::new(storage))
        }
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .context("S3_BUCKET must be set when STORAGE_BACKEND=s3")?;
            let client = build_client(config).await?;
            Ok(Arc::new(S3Storage::new(
                client,
                bucket,
                config.s3_public_base_url.clone(),
            )))
        }
    }
}
