use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use crate::error::Result;

/// Durable key -> bytes storage for deduplicated content
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store data under the given key
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Store a local file under the given key
    /// Default implementation reads the file to memory and calls put (not efficient for large files)
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<()> {
        let data = tokio::fs::read(local_path).await?;
        self.put(key, Bytes::from(data)).await
    }

    /// Read the bytes stored under a key
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
