use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, Result};
use crate::services::metrics::storage_savings;

/// Stored object record, one per distinct content hash
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub content_hash: String,
    pub blob_key: String,
    pub original_filename: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub reference_count: i64,
    pub created_at: String,
}

/// Fields for a record that does not exist yet
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub content_hash: String,
    pub blob_key: String,
    pub original_filename: String,
    pub media_type: String,
    pub size_bytes: i64,
}

/// File response with derived storage savings
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub content_hash: String,
    pub original_filename: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub created_at: String,
    pub reference_count: i64,
    pub storage_savings: i64,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        let storage_savings = storage_savings(&record);
        Self {
            id: record.id,
            content_hash: record.content_hash,
            original_filename: record.original_filename,
            media_type: record.media_type,
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            reference_count: record.reference_count,
            storage_savings,
        }
    }
}

/// Upload result: the record plus whether it matched existing content
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub file: FileResponse,
    pub duplicate: bool,
}

/// File list response
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// File list query parameters
#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    #[serde(alias = "file_type")]
    pub media_type: Option<String>,
    pub uploaded_after: Option<String>,
    pub uploaded_before: Option<String>,
    pub search: Option<String>,
    pub content_hash: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Sortable listing columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Filename,
    Size,
    CreatedAt,
    MediaType,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Filename => "original_filename",
            SortField::Size => "size_bytes",
            SortField::CreatedAt => "created_at",
            SortField::MediaType => "media_type",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "original_filename" | "filename" => Some(SortField::Filename),
            "size" | "size_bytes" => Some(SortField::Size),
            "uploaded_at" | "created_at" => Some(SortField::CreatedAt),
            "file_type" | "media_type" => Some(SortField::MediaType),
            _ => None,
        }
    }
}

/// Sort order, written as `field` or `-field` for descending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ordering {
    pub field: SortField,
    pub descending: bool,
}

impl Default for Ordering {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            descending: true,
        }
    }
}

impl Ordering {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (name, descending) = match raw.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        let field = SortField::from_str(name)
            .ok_or_else(|| AppError::Validation(format!("Unknown ordering field: {}", name)))?;
        Ok(Self { field, descending })
    }
}

/// Validated listing filter
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub media_type: Option<String>,
    pub uploaded_after: Option<String>,
    pub uploaded_before: Option<String>,
    pub search: Option<String>,
    pub content_hash: Option<String>,
}

/// One page of a listing, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn offset(&self) -> i64 {
        i64::from(self.number - 1) * i64::from(self.size)
    }
}

impl FileQuery {
    /// Validate raw query parameters into filter, ordering and page
    pub fn into_parts(self) -> Result<(FileFilter, Ordering, Page)> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(AppError::Validation(
                    "min_size must not exceed max_size".to_string(),
                ));
            }
        }

        let content_hash = self
            .content_hash
            .map(|h| crate::services::fingerprint::ContentHash::parse(&h))
            .transpose()?
            .map(|h| h.into_inner());

        let filter = FileFilter {
            min_size: self.min_size,
            max_size: self.max_size,
            media_type: non_empty(self.media_type),
            uploaded_after: non_empty(self.uploaded_after)
                .map(|s| parse_timestamp(&s, "uploaded_after"))
                .transpose()?,
            uploaded_before: non_empty(self.uploaded_before)
                .map(|s| parse_timestamp(&s, "uploaded_before"))
                .transpose()?,
            search: non_empty(self.search),
            content_hash,
        };

        let ordering = match non_empty(self.ordering) {
            Some(raw) => Ordering::parse(&raw)?,
            None => Ordering::default(),
        };

        let page = Page {
            number: self.page.unwrap_or(1).max(1),
            size: self
                .page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        };

        Ok((filter, ordering, page))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a client timestamp into the stored representation
fn parse_timestamp(raw: &str, field: &str) -> Result<String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| format_timestamp(dt.with_timezone(&Utc)))
        .map_err(|_| AppError::Validation(format!("{} must be an RFC 3339 timestamp", field)))
}

/// Fixed-width UTC timestamps keep lexical and chronological order equal
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size_bytes: i64, reference_count: i64) -> FileRecord {
        FileRecord {
            id: "id".to_string(),
            content_hash: "a".repeat(64),
            blob_key: "aa/bb".to_string(),
            original_filename: "report.pdf".to_string(),
            media_type: "application/pdf".to_string(),
            size_bytes,
            reference_count,
            created_at: now_timestamp(),
        }
    }

    #[test]
    fn test_response_carries_savings() {
        let response = FileResponse::from(record(100, 3));
        assert_eq!(response.storage_savings, 200);
        assert_eq!(response.reference_count, 3);
    }

    #[test]
    fn test_upload_response_flattens_record() {
        let response = UploadResponse {
            file: FileResponse::from(record(10, 1)),
            duplicate: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["duplicate"], false);
        assert_eq!(json["storage_savings"], 0);
        assert_eq!(json["original_filename"], "report.pdf");
        assert!(json.get("blob_key").is_none());
    }

    #[test]
    fn test_ordering_parse() {
        assert_eq!(Ordering::default().field, SortField::CreatedAt);
        let o = Ordering::parse("-size").unwrap();
        assert_eq!(o.field, SortField::Size);
        assert!(o.descending);
        let o = Ordering::parse("original_filename").unwrap();
        assert_eq!(o.field, SortField::Filename);
        assert!(!o.descending);
        assert!(matches!(
            Ordering::parse("-password"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_query_validation() {
        let query = FileQuery {
            content_hash: Some("xyz".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.into_parts(), Err(AppError::Validation(_))));

        let query = FileQuery {
            min_size: Some(10),
            max_size: Some(5),
            ..Default::default()
        };
        assert!(matches!(query.into_parts(), Err(AppError::Validation(_))));

        let query = FileQuery {
            uploaded_after: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.into_parts(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_query_defaults_and_clamping() {
        let query = FileQuery {
            page: Some(0),
            page_size: Some(10_000),
            search: Some("   ".to_string()),
            uploaded_after: Some("2024-03-01T12:00:00+02:00".to_string()),
            content_hash: Some("AB".repeat(32)),
            ..Default::default()
        };
        let (filter, ordering, page) = query.into_parts().unwrap();
        assert_eq!(page, Page { number: 1, size: MAX_PAGE_SIZE });
        assert_eq!(page.offset(), 0);
        assert_eq!(ordering, Ordering::default());
        assert!(filter.search.is_none());
        assert_eq!(
            filter.uploaded_after.as_deref(),
            Some("2024-03-01T10:00:00.000000Z")
        );
        assert_eq!(filter.content_hash, Some("ab".repeat(32)));
    }
}
