use anyhow::Result;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;

use super::{ObjectStorage, StorageError, StorageResult};
use crate::config::AppConfig;

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region = Region::new(config.aws_region.clone());
    let region_provider = RegionProviderChain::first_try(Some(region))
        .or_default_provider()
        .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.clone(),
        config.aws_secret_access_key.clone(),
    ) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");
        loader = loader.credentials_provider(credentials);
    }

    let base_config = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    Ok(S3Client::from_conf(s3_config))
}

/// Remote object storage in an S3-compatible bucket.
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl S3Storage {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request.send().await.map_err(|err| {
            StorageError::Backend(format!(
                "failed to upload object to S3: {}",
                err.into_service_error()
            ))
        })?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                return Err(StorageError::Backend(format!(
                    "failed to download object from S3: {service_err}"
                )));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Backend(format!("failed to read object stream: {err}")))?
            .into_bytes();

        Ok(bytes)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                StorageError::Backend(format!(
                    "failed to delete object from S3: {}",
                    err.into_service_error()
                ))
            })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!(
                        "failed to inspect object in S3: {service_err}"
                    )))
                }
            }
        }
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.public_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key))
    }
}
