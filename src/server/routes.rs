//! Request handlers

use super::{error::ApiError, state::AppState};
use crate::services::format::PNG_CONTENT_TYPE;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

pub const REMOVE_BACKGROUND_PATH: &str = "/api/remove-background";
pub const HEALTH_PATH: &str = "/health";

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub backend: String,
    pub started_at: DateTime<Utc>,
}

/// `POST /api/remove-background`
///
/// Reads the uploaded image from the multipart body and answers with the
/// cutout as `image/png`.
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
pub async fn remove_background(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart?;
    let upload = read_upload(&mut multipart, &state.upload_field).await?;
    let upload_len = upload.len();

    let encoded = state.remover.remove_background(upload).await?;

    info!(
        upload_bytes = upload_len,
        png_bytes = encoded.png.len(),
        width = encoded.width,
        height = encoded.height,
        inference_ms = encoded.timings.inference_ms,
        total_ms = encoded.timings.total_ms,
        "Background removed"
    );

    Ok(([(header::CONTENT_TYPE, PNG_CONTENT_TYPE)], encoded.png).into_response())
}

/// Bytes of the configured field, or of the first part carrying a filename
async fn read_upload(multipart: &mut Multipart, field_name: &str) -> Result<Vec<u8>, ApiError> {
    let mut fallback = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(field_name) {
            return Ok(field.bytes().await?.to_vec());
        }
        if fallback.is_none() && field.file_name().is_some() {
            fallback = Some(field.bytes().await?.to_vec());
        }
    }

    fallback.ok_or_else(|| ApiError::missing_file(field_name))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.remover.model_name().to_string(),
        backend: state.remover.backend_type().to_string(),
        started_at: state.started_at,
    })
}
