use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// Local file system blob store
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(AppError::Storage(format!("Invalid blob key: {}", key)));
        }
        Ok(self.base_path.join(relative))
    }

    /// Sibling temp path; blobs only appear under their key via rename
    fn temp_path_for(full_path: &Path) -> PathBuf {
        let mut name = full_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".tmp-{}", Uuid::new_v4()));
        full_path.with_file_name(name)
    }

    async fn prepare_parent(full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Storage(format!("Failed to create blob directory: {}", e))
            })?;
        }
        Ok(())
    }

    async fn commit(temp_path: &Path, full_path: &Path) -> Result<()> {
        if let Err(e) = fs::rename(temp_path, full_path).await {
            let _ = fs::remove_file(temp_path).await;
            return Err(AppError::Storage(format!("Failed to commit blob: {}", e)));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(key)?;
        Self::prepare_parent(&full_path).await?;

        let temp_path = Self::temp_path_for(&full_path);
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AppError::Storage(format!("Failed to write blob: {}", e)));
        }

        Self::commit(&temp_path, &full_path).await?;
        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(())
    }

    async fn put_file(&self, key: &str, local_path: &Path) -> Result<()> {
        let full_path = self.get_full_path(key)?;
        Self::prepare_parent(&full_path).await?;

        let temp_path = Self::temp_path_for(&full_path);
        if let Err(e) = fs::copy(local_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AppError::Storage(format!("Failed to copy blob: {}", e)));
        }

        Self::commit(&temp_path, &full_path).await?;
        tracing::debug!("Copied blob from {:?} to {:?}", local_path, full_path);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(key)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Blob not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to read blob: {}", e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.get_full_path(key)?;
        fs::try_exists(&full_path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to stat blob: {}", e)))
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}
