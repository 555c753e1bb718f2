//! Ingestion Service
//!
//! Turns a spooled upload into a file record: validate, look up the content
//! hash, then either add a reference to the existing record or write the
//! blob and insert a new record.
//!
//! Two layers keep identical concurrent uploads from producing two records:
//! a per-hash async lock serialises ingestion within this process, and the
//! UNIQUE constraint on `content_hash` catches anything that gets past it
//! (another process on the same database). A lost insert race is resolved
//! by falling back to the increment path.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{FileRecord, NewFileRecord};
use crate::services::fingerprint::ContentHash;
use crate::services::repository::FileRepository;
use crate::services::spool::SpooledUpload;
use crate::storage::BlobStore;

/// Client-declared metadata for an upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub original_filename: String,
    pub media_type: String,
    /// Advisory only; the spooled byte count is authoritative
    pub declared_size: Option<u64>,
}

/// Result of ingesting one upload
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: FileRecord,
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct IngestService {
    inner: Arc<IngestServiceInner>,
}

struct IngestServiceInner {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    /// One lock per content hash with an ingestion in flight
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IngestService {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            inner: Arc::new(IngestServiceInner {
                db,
                blobs,
                locks: DashMap::new(),
            }),
        }
    }

    /// Ingest a spooled upload.
    ///
    /// Returns the new or updated record; `duplicate` is true when the
    /// content already existed. The spool file is left in place for the
    /// caller to clean up.
    pub async fn ingest(&self, upload: &SpooledUpload, meta: UploadMetadata) -> Result<IngestOutcome> {
        if upload.size_bytes == 0 {
            return Err(AppError::EmptyInput("The submitted file is empty".to_string()));
        }

        if let Some(declared) = meta.declared_size {
            if declared != upload.size_bytes {
                tracing::warn!(
                    declared_size = declared,
                    actual_size = upload.size_bytes,
                    "Declared upload size does not match received bytes"
                );
            }
        }

        let entry = self.lock_for(&upload.content_hash);
        let _guard = entry.acquire().await;
        self.ingest_locked(upload, meta).await
    }

    async fn ingest_locked(&self, upload: &SpooledUpload, meta: UploadMetadata) -> Result<IngestOutcome> {
        let db = &self.inner.db;

        match FileRepository::find_by_hash(db, upload.content_hash.as_str()).await? {
            Some(existing) => self.add_reference(existing).await,
            None => self.store_new(upload, meta).await,
        }
    }

    /// No record yet: write the blob, then insert.
    /// The record is only created once its blob is durable.
    async fn store_new(&self, upload: &SpooledUpload, meta: UploadMetadata) -> Result<IngestOutcome> {
        let db = &self.inner.db;
        let hash = &upload.content_hash;
        let blob_key = hash.blob_key();
        let size_bytes = i64::try_from(upload.size_bytes)
            .map_err(|_| AppError::Validation("Upload too large".to_string()))?;

        // A blob without a record is left behind when an earlier insert
        // failed; identical content means it can be reused as is.
        if !self.inner.blobs.exists(&blob_key).await? {
            self.inner.blobs.put_file(&blob_key, &upload.path).await?;
        }

        let new = NewFileRecord {
            content_hash: hash.as_str().to_string(),
            blob_key,
            original_filename: meta.original_filename,
            media_type: meta.media_type,
            size_bytes,
        };

        match FileRepository::insert(db, new).await {
            Ok(record) => {
                tracing::info!(
                    content_hash = %hash,
                    record_id = %record.id,
                    size_bytes = record.size_bytes,
                    "Stored new content"
                );
                Ok(IngestOutcome {
                    record,
                    duplicate: false,
                })
            }
            Err(AppError::Conflict(_)) => {
                tracing::info!(
                    content_hash = %hash,
                    "Concurrent insert won the race, adding a reference instead"
                );
                let existing = FileRepository::find_by_hash(db, hash.as_str())
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("Record for {} vanished after conflict", hash))
                    })?;
                self.add_reference(existing).await
            }
            Err(e) => Err(e),
        }
    }

    async fn add_reference(&self, existing: FileRecord) -> Result<IngestOutcome> {
        let record = FileRepository::increment_reference(&self.inner.db, &existing.id).await?;

        tracing::info!(
            content_hash = %record.content_hash,
            record_id = %record.id,
            reference_count = record.reference_count,
            "Duplicate content matched"
        );

        Ok(IngestOutcome {
            record,
            duplicate: true,
        })
    }

    fn lock_for(&self, hash: &ContentHash) -> HashLock<'_> {
        let key = hash.as_str().to_string();
        let lock = self.inner.locks.entry(key.clone()).or_default().clone();
        HashLock {
            locks: &self.inner.locks,
            key,
            lock,
        }
    }
}

/// Handle on one entry of the per-hash lock map.
/// Dropping it removes the entry once nobody else holds or waits on it,
/// on every exit path including a cancelled ingestion.
struct HashLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl HashLock<'_> {
    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for HashLock<'_> {
    fn drop(&mut self) {
        // release our handle first so the count below only sees others
        drop(std::mem::take(&mut self.lock));
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
