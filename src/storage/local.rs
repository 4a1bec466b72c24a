use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStorage, StorageError, StorageResult};

/// Stores objects as plain files below a base directory.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> std::io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Keys are relative paths made of normal components only.
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let is_safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        _content_type: Option<String>,
    ) -> StorageResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
