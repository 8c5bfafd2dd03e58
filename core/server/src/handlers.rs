//! Route handlers.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use driveocr_common::SafeFileName;
use driveocr_ocr::{BatchEntry, Submission};

use crate::error::ApiError;
use crate::state::AppState;

/// Multipart field carrying the uploaded images.
pub const FILES_FIELD: &str = "files[]";

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub results: Vec<BatchEntry>,
}

/// GET / - upload page
pub async fn index() -> Html<&'static str> {
    debug!("Accessing index route");
    Html(INDEX_HTML)
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// POST /upload - convert every file sent under `files[]`
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = Vec::new();
    let mut saw_files_field = false;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        saw_files_field = true;

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        files.push(Submission::new(filename, data));
    }

    if !saw_files_field {
        return Err(ApiError::bad_request("No file part"));
    }

    info!(files = files.len(), "Received upload");

    let result = state
        .orchestrator()
        .run_batch(files)
        .await
        .map_err(ApiError::unavailable)?;

    Ok(Json(UploadResponse {
        results: result.entries,
    }))
}

/// GET /download/{filename} - serve an artifact as an attachment
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let name = SafeFileName::sanitize(&filename)
        .filter(|safe| safe.as_str() == filename)
        .ok_or_else(|| ApiError::not_found(format!("File not found: {}", filename)))?;

    let path = state.upload_dir().join(name.as_str());
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        ApiError::not_found(format!("Error downloading file {}: {}", name, e))
    })?;

    let content_type = match name.extension().as_deref() {
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
