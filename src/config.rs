use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::upload::{LOCAL_MAX_UPLOAD_BYTES, REMOTE_MAX_UPLOAD_BYTES};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl StorageBackend {
    /// Upload ceiling applied when `MAX_UPLOAD_SIZE` is not set.
    pub fn default_max_upload_bytes(self) -> u64 {
        match self {
            StorageBackend::Local => LOCAL_MAX_UPLOAD_BYTES,
            StorageBackend::S3 => REMOTE_MAX_UPLOAD_BYTES,
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            other => Err(anyhow!(
                "unsupported STORAGE_BACKEND '{other}', expected 'local' or 's3'"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub max_upload_size: u64,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: Option<String>,
    pub s3_public_base_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "sikat".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "sikat-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "1440".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let storage_backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse()?;
        let local_storage_path =
            env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./uploads".to_string());
        let max_upload_size = match env::var("MAX_UPLOAD_SIZE") {
            Ok(value) => value
                .parse()
                .context("MAX_UPLOAD_SIZE must be a number of bytes")?,
            Err(_) => storage_backend.default_max_upload_bytes(),
        };
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").ok();
        if storage_backend == StorageBackend::S3 && s3_bucket.is_none() {
            return Err(anyhow!("S3_BUCKET must be set when STORAGE_BACKEND=s3"));
        }
        let s3_public_base_url = env::var("S3_PUBLIC_BASE_URL").ok();

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            storage_backend,
            local_storage_path,
            max_upload_size,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            s3_public_base_url,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_none() {
                return parsed.to_string();
            }
            match parsed.set_password(Some("*****")) {
                Ok(()) => parsed.to_string(),
                Err(()) => "***".to_string(),
            }
        }
        Err(_) => "***".to_string(),
    }
}
