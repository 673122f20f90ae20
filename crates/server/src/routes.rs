use std::sync::Arc;

use autoform_core::FieldRecord;
use autoform_ocr::{FormPipeline, OcrBackend};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub type SharedPipeline = Arc<FormPipeline<Box<dyn OcrBackend>>>;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("Missing multipart field `file`")]
    MissingFile,
    #[error("Invalid upload: {0}")]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

pub fn router(pipeline: SharedPipeline, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract-form", post(extract_form))
        .route("/extract-form/", post(extract_form))
        .with_state(pipeline)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn extract_form(
    State(pipeline): State<SharedPipeline>,
    mut multipart: Multipart,
) -> Result<Json<FieldRecord>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let bytes = upload.ok_or(ApiError::MissingFile)?;
    debug!(bytes = bytes.len(), "Upload received");

    // Image decoding and OCR are CPU-bound.
    let record = match tokio::task::spawn_blocking(move || pipeline.extract_bytes(&bytes)).await {
        Ok(record) => record,
        Err(e) => {
            warn!("Extraction task failed: {e}");
            FieldRecord::default()
        }
    };
    Ok(Json(record))
}
