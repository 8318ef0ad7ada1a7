// HTTP API: liveness probe, file upload and download.
//
// Uploads land in the blob store under a secure random name; the
// response and the broadcast `file_shared` event both carry a
// time-limited download URL. `/files/{name}` is the local endpoint
// those URLs point at.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use drawbridge_common::protocol::ws::{FileInfo, ServerEvent};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::blob::{secure_object_name, BlobError, BlobStore, DOWNLOAD_URL_TTL_SECS};
use crate::error::{ApiError, ErrorCode};
use crate::history::chat_collection_path;
use crate::registry::UNKNOWN_USERNAME;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/upload/{session_id}", post(upload))
        .route("/download/{secure_name}", get(download))
        .route("/files/{secure_name}", get(serve_file))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn upload(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FileInfo>, ApiError> {
    let blobs = require_blobs(&state)?;

    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut username = UNKNOWN_USERNAME.to_owned();

    while let Some(field) = multipart.next_field().await.map_err(|error| {
        ApiError::new(ErrorCode::ValidationFailed, "malformed multipart body")
            .with_details(json!({ "reason": error.to_string() }))
    })? {
        let field_name = field.name().map(ToOwned::to_owned);
        match field_name.as_deref() {
            Some("file") => {
                let original_name = field
                    .file_name()
                    .map(ToOwned::to_owned)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        ApiError::new(ErrorCode::ValidationFailed, "file field has no filename")
                    })?;
                let content_type = field
                    .content_type()
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| "application/octet-stream".to_owned());
                let bytes = field.bytes().await.map_err(|error| {
                    ApiError::new(ErrorCode::UploadFailed, "failed to read file field")
                        .with_details(json!({ "reason": error.to_string() }))
                })?;
                file = Some((original_name, content_type, bytes.to_vec()));
            }
            Some("username") => {
                if let Ok(value) = field.text().await {
                    if !value.is_empty() {
                        username = value;
                    }
                }
            }
            _ => {}
        }
    }

    let (original_name, content_type, bytes) = file.ok_or_else(|| {
        ApiError::new(ErrorCode::ValidationFailed, "missing file field")
            .with_details(json!({ "field": "file" }))
    })?;

    let secure_name = secure_object_name(&original_name);
    blobs.put(&secure_name, &bytes, &content_type).await.map_err(upload_error)?;
    let download_url = blobs
        .download_url(&secure_name, DOWNLOAD_URL_TTL_SECS, "GET")
        .await
        .map_err(upload_error)?;

    let file_info = FileInfo {
        original_name,
        secure_name,
        size: bytes.len() as u64,
        content_type,
        download_url,
        uploaded_at: Utc::now(),
    };
    info!(
        %session_id,
        secure_name = %file_info.secure_name,
        size = file_info.size,
        "file uploaded"
    );

    let event = ServerEvent::FileShared {
        file_info: file_info.clone(),
        username,
        timestamp: Utc::now(),
    };
    match serde_json::to_value(&event) {
        Ok(record) => state.persist.enqueue(&chat_collection_path(&session_id), record),
        Err(error) => warn!(%session_id, ?error, "failed to encode file share record"),
    }
    match serde_json::to_string(&event) {
        Ok(frame) => {
            state.registry.broadcast(&session_id, &frame, None).await;
        }
        Err(error) => warn!(%session_id, ?error, "failed to encode file share event"),
    }

    Ok(Json(file_info))
}

async fn download(
    Path(secure_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let blobs = require_blobs(&state)?;

    let download_url = blobs
        .download_url(&secure_name, DOWNLOAD_URL_TTL_SECS, "GET")
        .await
        .map_err(|error| match error {
            BlobError::NotFound(name) => ApiError::new(ErrorCode::NotFound, "file not found")
                .with_details(json!({ "secure_name": name })),
            BlobError::Io(_) => ApiError::from_code(ErrorCode::StorageUnavailable),
        })?;

    Ok(Json(json!({
        "download_url": download_url,
        "expires_in": DOWNLOAD_URL_TTL_SECS,
    })))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    expires: Option<i64>,
    sig: Option<String>,
}

async fn serve_file(
    Path(secure_name): Path<String>,
    Query(query): Query<FileQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let blobs = require_blobs(&state)?;

    let signature = match (query.expires, query.sig.as_deref()) {
        (Some(expires), Some(sig)) => Some((expires, sig)),
        _ => None,
    };
    let (bytes, content_type) =
        blobs.read_authorized(&secure_name, signature).await.map_err(|error| match error {
            BlobError::NotFound(name) => ApiError::new(ErrorCode::NotFound, "file not found")
                .with_details(json!({ "secure_name": name })),
            BlobError::Io(_) => ApiError::from_code(ErrorCode::StorageUnavailable),
        })?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn require_blobs(state: &AppState) -> Result<&BlobStore, ApiError> {
    state.blobs.as_ref().ok_or_else(|| ApiError::from_code(ErrorCode::StorageUnavailable))
}

fn upload_error(error: BlobError) -> ApiError {
    ApiError::new(ErrorCode::UploadFailed, "failed to store file")
        .with_details(json!({ "reason": error.to_string() }))
}
