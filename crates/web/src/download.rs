//! Streaming archive downloads
//!
//! Archives can be hundreds of megabytes, so responses are streamed in
//! bounded chunks off a `tokio::fs::File`. Backpressure from the
//! connection propagates to the reader; the whole file is never held in
//! memory.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use cyberlab_common::format_size;

use crate::server::AppState;
use crate::store::{file_extension, file_stem, sanitize_name, Resolution};

/// Read buffer per chunk while streaming a download.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

fn content_type_for(ext: &str) -> &'static str {
    if ext == "zip" {
        "application/zip"
    } else {
        "application/octet-stream"
    }
}

/// `GET /api/machines/:name/download`
pub async fn download_machine_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    stream_archive(&state, &name).await
}

/// `GET /api/download/:filename`
///
/// Legacy filename-addressed route. The stem goes through the same
/// canonical resolution as the machine-name route.
pub async fn download_file_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let stem = file_stem(std::path::Path::new(&filename));
    stream_archive(&state, &stem).await
}

async fn stream_archive(state: &AppState, name: &str) -> Response {
    let sanitized = sanitize_name(name);

    let (path, size_bytes) = match state.catalog.store().resolve(name) {
        Resolution::Found { path, size_bytes } => (path, size_bytes),
        Resolution::NotFound => {
            warn!("Archive not found for download: {}", name);
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": "Machine not found",
                    "message": format!("The archive for {} is not available for download", name),
                })),
            )
                .into_response();
        }
    };

    let ext = file_extension(&path);

    // Nothing has been written yet, so an open failure can still become
    // a clean 500 payload. A read failure after this point terminates
    // the stream instead.
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open archive {}: {}", path.display(), e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal server error",
                    "message": "Could not read the machine archive",
                })),
            )
                .into_response();
        }
    };

    info!(
        "Download started: {}.{} ({})",
        sanitized,
        ext,
        format_size(size_bytes)
    );

    let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_BYTES);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&ext))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.{}\"", sanitized, ext),
        )
        .header(header::CONTENT_LENGTH, size_bytes)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap()
}

/// `GET /api/machines/:name/check`
pub async fn check_machine_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.catalog.store().resolve(&name) {
        Resolution::Found { path, size_bytes } => Json(serde_json::json!({
            "available": true,
            "size": size_bytes,
            "sizeFormatted": format_size(size_bytes),
            "path": path.to_string_lossy(),
        })),
        Resolution::NotFound => Json(serde_json::json!({
            "available": false,
            "message": "Archive not found",
        })),
    }
}
