use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{FileListResponse, FileQuery, FileResponse, UploadResponse};
use crate::services::fingerprint::ContentHash;
use crate::services::metrics::StorageSummary;
use crate::services::{FileRepository, SpooledUpload, Spooler, UploadMetadata};
use crate::AppState;

const FALLBACK_FILENAME: &str = "upload";

/// Multipart fields collected from an upload request
#[derive(Default)]
struct ReceivedUpload {
    spooled: Option<SpooledUpload>,
    file_name: Option<String>,
    content_type: Option<String>,
    declared_size: Option<u64>,
}

/// Upload a file
/// POST /api/v1/files
///
/// 201 when the content is new, 200 when it matched an existing record.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<UploadResponse>>)> {
    let received = receive_upload(&state, &mut multipart).await?;
    let spooled = received
        .spooled
        .ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

    let original_filename = resolve_filename(received.file_name);
    let media_type = resolve_media_type(received.content_type, &original_filename);
    let meta = UploadMetadata {
        original_filename,
        media_type,
        declared_size: received.declared_size,
    };

    let result = state.ingest.ingest(&spooled, meta).await;
    spooled.cleanup();
    if let Err(ref e) = result {
        tracing::warn!(client_error = e.is_client_error(), "Upload rejected: {}", e);
    }
    let outcome = result?;

    let (status, message) = if outcome.duplicate {
        (
            StatusCode::OK,
            format!(
                "File was deduplicated successfully. This file has {} references.",
                outcome.record.reference_count
            ),
        )
    } else {
        (StatusCode::CREATED, "File uploaded successfully".to_string())
    };

    let body = UploadResponse {
        file: FileResponse::from(outcome.record),
        duplicate: outcome.duplicate,
    };
    Ok((status, Json(ApiResponse::with_message(message, body))))
}

/// Read all multipart fields, spooling the `file` part to disk.
/// On error the partial spool file is dropped with `received`.
async fn receive_upload(state: &AppState, multipart: &mut Multipart) -> Result<ReceivedUpload> {
    let mut received = ReceivedUpload::default();
    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" if received.spooled.is_none() => {
                received.file_name = field.file_name().map(|s| s.to_string());
                received.content_type = field.content_type().map(|s| s.to_string());

                let mut spooler = Spooler::create(
                    std::path::Path::new(&state.config.storage.spool_dir),
                    state.config.upload.max_upload_bytes,
                )
                .await?;

                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            if let Err(e) = spooler.write_chunk(&chunk).await {
                                spooler.abort();
                                return Err(e);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            spooler.abort();
                            return Err(AppError::BadRequest(format!(
                                "Failed to read file chunk: {}",
                                e
                            )));
                        }
                    }
                }

                received.spooled = Some(spooler.finish().await?);
            }
            "size" => {
                let text = field.text().await.unwrap_or_default();
                received.declared_size = text.trim().parse().ok();
            }
            _ => {}
        }
    }
    Ok(received)
}

/// Last path segment of the client filename
fn resolve_filename(file_name: Option<String>) -> String {
    file_name
        .as_deref()
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

/// Declared media type, else a guess from the extension
fn resolve_media_type(content_type: Option<String>, file_name: &str) -> String {
    content_type
        .map(|ct| ct.trim().to_string())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .to_string()
        })
}

/// List files
/// GET /api/v1/files?min_size=&max_size=&media_type=&search=&ordering=-uploaded_at&page=1
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ApiResponse<FileListResponse>>> {
    let (filter, ordering, page) = query.into_parts()?;
    let (records, total) = FileRepository::list(&state.db, &filter, ordering, page).await?;

    Ok(Json(ApiResponse::success(FileListResponse {
        files: records.into_iter().map(FileResponse::from).collect(),
        total,
        page: page.number,
        page_size: page.size,
    })))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let record = FileRepository::get(&state.db, &id).await?;
    Ok(Json(ApiResponse::success(FileResponse::from(record))))
}

/// Look up a file by content hash
/// GET /api/v1/files/hash/:content_hash
pub async fn get_file_by_hash(
    State(state): State<AppState>,
    Path(content_hash): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let hash = ContentHash::parse(&content_hash)?;
    let record = FileRepository::find_by_hash(&state.db, hash.as_str())
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
    Ok(Json(ApiResponse::success(FileResponse::from(record))))
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let record = FileRepository::get(&state.db, &id).await?;

    // A record always points at a written blob; a missing one is a store fault
    let data = state.blobs.get(&record.blob_key).await.map_err(|e| match e {
        AppError::NotFound(_) => {
            AppError::Storage(format!("Blob {} missing for record {}", record.blob_key, record.id))
        }
        other => other,
    })?;

    let fallback_name = record.original_filename.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&record.original_filename);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.media_type.as_str())
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Store-wide deduplication totals
/// GET /api/v1/files/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<ApiResponse<StorageSummary>>> {
    let (records, references, physical, logical) = FileRepository::totals(&state.db).await?;
    Ok(Json(ApiResponse::success(StorageSummary::from_totals(
        records, references, physical, logical,
    ))))
}
