use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{now_timestamp, FileFilter, FileRecord, NewFileRecord, Ordering, Page};

/// Persistent mapping from content hash to file record.
///
/// Writes with `RETURNING` are drained with `fetch_all` so the implicit
/// transaction has committed before the call returns.
pub struct FileRepository;

impl FileRepository {
    /// Exact-match lookup by content hash
    pub async fn find_by_hash(db: &Database, content_hash: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as("SELECT * FROM files WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(db.pool())
            .await?;
        Ok(record)
    }

    /// Get a record by ID
    pub async fn get(db: &Database, id: &str) -> Result<FileRecord> {
        sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// Insert a new record with a reference count of 1.
    ///
    /// Fails with `AppError::Conflict` if the content hash is already
    /// present; never creates a second record for the same hash.
    pub async fn insert(db: &Database, new: NewFileRecord) -> Result<FileRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        let result: std::result::Result<Vec<FileRecord>, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO files (id, content_hash, blob_key, original_filename, media_type, size_bytes, reference_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new.content_hash)
        .bind(&new.blob_key)
        .bind(&new.original_filename)
        .bind(&new.media_type)
        .bind(new.size_bytes)
        .bind(&now)
        .fetch_all(db.pool())
        .await;

        match result {
            Ok(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Internal("Insert returned no row".to_string())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict(format!(
                    "A file with content hash {} already exists",
                    new.content_hash
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Add one reference in a single statement and return the updated record
    pub async fn increment_reference(db: &Database, id: &str) -> Result<FileRecord> {
        let rows: Vec<FileRecord> = sqlx::query_as(
            "UPDATE files SET reference_count = reference_count + 1 WHERE id = ? RETURNING *",
        )
        .bind(id)
        .fetch_all(db.pool())
        .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// List records matching the filter; returns the page and the total match count
    pub async fn list(
        db: &Database,
        filter: &FileFilter,
        ordering: Ordering,
        page: Page,
    ) -> Result<(Vec<FileRecord>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM files");
        push_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(db.pool()).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM files");
        push_filters(&mut query, filter);
        query
            .push(" ORDER BY ")
            .push(ordering.field.column())
            .push(if ordering.descending { " DESC" } else { " ASC" })
            .push(", id ASC LIMIT ")
            .push_bind(i64::from(page.size))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let records = query
            .build_query_as::<FileRecord>()
            .fetch_all(db.pool())
            .await?;

        Ok((records, total))
    }

    /// Raw totals: (records, references, physical bytes, logical bytes)
    pub async fn totals(db: &Database) -> Result<(i64, i64, i64, i64)> {
        let totals = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(reference_count), 0),
                   COALESCE(SUM(size_bytes), 0),
                   COALESCE(SUM(size_bytes * reference_count), 0)
            FROM files
            "#,
        )
        .fetch_one(db.pool())
        .await?;
        Ok(totals)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &FileFilter) {
    let mut conditions = 0usize;

    if let Some(min) = filter.min_size {
        next_condition(qb, &mut conditions);
        qb.push("size_bytes >= ").push_bind(min);
    }
    if let Some(max) = filter.max_size {
        next_condition(qb, &mut conditions);
        qb.push("size_bytes <= ").push_bind(max);
    }
    if let Some(ref media_type) = filter.media_type {
        next_condition(qb, &mut conditions);
        qb.push("LOWER(media_type) = ")
            .push_bind(media_type.to_ascii_lowercase());
    }
    if let Some(ref after) = filter.uploaded_after {
        next_condition(qb, &mut conditions);
        qb.push("created_at >= ").push_bind(after.clone());
    }
    if let Some(ref before) = filter.uploaded_before {
        next_condition(qb, &mut conditions);
        qb.push("created_at <= ").push_bind(before.clone());
    }
    if let Some(ref hash) = filter.content_hash {
        next_condition(qb, &mut conditions);
        qb.push("content_hash = ").push_bind(hash.clone());
    }
    if let Some(ref search) = filter.search {
        let pattern = format!("%{}%", escape_like(&search.to_ascii_lowercase()));
        next_condition(qb, &mut conditions);
        qb.push("(LOWER(original_filename) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(media_type) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

fn next_condition(qb: &mut QueryBuilder<'_, Sqlite>, conditions: &mut usize) {
    qb.push(if *conditions == 0 { " WHERE " } else { " AND " });
    *conditions += 1;
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
