//! Upload spooling.
//!
//! The upload body is consumed once: each chunk is hashed and appended to a
//! temp file in the spool directory. The blob store later copies that file
//! only when the content turns out to be new, so memory use stays at one
//! chunk regardless of upload size.
//!
//! Spool files are owned by a `TempPath` and removed when the `Spooler` or
//! `SpooledUpload` holding them is dropped, including when a request is
//! cancelled mid-upload.

use std::path::Path;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::services::fingerprint::{ContentHash, Fingerprinter};

/// Writes an upload to disk while fingerprinting it
pub struct Spooler {
    file: fs::File,
    path: TempPath,
    fingerprinter: Fingerprinter,
    max_bytes: u64,
}

/// A fully received upload: spool file, digest and authoritative size
#[derive(Debug)]
pub struct SpooledUpload {
    pub path: TempPath,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
}

impl Spooler {
    pub async fn create(spool_dir: &Path, max_bytes: u64) -> Result<Self> {
        fs::create_dir_all(spool_dir).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix("upload_")
            .tempfile_in(spool_dir)
            .map_err(|e| AppError::Internal(format!("Failed to create spool file: {}", e)))?
            .into_parts();

        Ok(Self {
            file: fs::File::from_std(file),
            path,
            fingerprinter: Fingerprinter::new(),
            max_bytes,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.fingerprinter.bytes_seen() + chunk.len() as u64 > self.max_bytes {
            return Err(AppError::Validation(format!(
                "Upload exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        self.fingerprinter.update(chunk);
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write spool file: {}", e)))
    }

    pub async fn finish(mut self) -> Result<SpooledUpload> {
        self.file
            .flush()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to flush spool file: {}", e)))?;

        let Spooler {
            file,
            path,
            fingerprinter,
            ..
        } = self;
        drop(file);

        Ok(SpooledUpload {
            path,
            size_bytes: fingerprinter.bytes_seen(),
            content_hash: fingerprinter.finalize(),
        })
    }

    /// Drop a partially received upload
    pub fn abort(self) {
        let Spooler { file, path, .. } = self;
        drop(file);
        remove_spool_file(path);
    }
}

impl SpooledUpload {
    /// Remove the spool file once ingestion is done with it
    pub fn cleanup(self) {
        remove_spool_file(self.path);
    }
}

fn remove_spool_file(path: TempPath) {
    let spool_path = path.to_path_buf();
    if let Err(e) = path.close() {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!("Failed to remove spool file {:?}: {}", spool_path, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Spool an in-memory payload in one chunk
    pub async fn spool_bytes(dir: &Path, data: &[u8]) -> SpooledUpload {
        let mut spooler = Spooler::create(dir, u64::MAX).await.unwrap();
        spooler.write_chunk(data).await.unwrap();
        spooler.finish().await.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spool_entries(dir: &Path) -> usize {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_spool_hashes_and_persists_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut spooler = Spooler::create(dir.path(), 1024).await.unwrap();
        let chunks: [&[u8]; 3] = [b"This is ", b"a test ", b"file content"];
        for chunk in chunks {
            spooler.write_chunk(chunk).await.unwrap();
        }
        let upload = spooler.finish().await.unwrap();

        assert_eq!(upload.size_bytes, 27);
        assert_eq!(
            upload.content_hash,
            ContentHash::from_data(b"This is a test file content")
        );
        assert_eq!(
            tokio::fs::read(&upload.path).await.unwrap(),
            b"This is a test file content"
        );

        let path = upload.path.to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("upload_"));
        upload.cleanup();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_spool_enforces_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut spooler = Spooler::create(dir.path(), 8).await.unwrap();
        spooler.write_chunk(b"12345").await.unwrap();
        let err = spooler.write_chunk(b"6789").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let path = spooler.path.to_path_buf();
        spooler.abort();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_spool() {
        let dir = tempfile::tempdir().unwrap();
        let spooler = Spooler::create(dir.path(), 8).await.unwrap();
        let upload = spooler.finish().await.unwrap();
        assert_eq!(upload.size_bytes, 0);
        assert_eq!(upload.content_hash, ContentHash::from_data(b""));
        upload.cleanup();
    }

    #[tokio::test]
    async fn test_dropped_spool_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();

        let mut partial = Spooler::create(dir.path(), 1024).await.unwrap();
        partial.write_chunk(b"half an upload").await.unwrap();
        let received = test_support::spool_bytes(dir.path(), b"a whole upload").await;
        assert_eq!(spool_entries(dir.path()).await, 2);

        drop(partial);
        drop(received);
        assert_eq!(spool_entries(dir.path()).await, 0);
    }
}
