use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::QueryRejection,
        Multipart, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};

use crate::models::enhance::EnhanceOptions;
use crate::models::error::AppError;
use crate::{AppState, RequestId};

const IMAGE_FIELD: &str = "image";

// ---------------------------------------------------------------------------
// POST /api/enhance?resize=&denoise=&upscale=
// ---------------------------------------------------------------------------

pub async fn enhance_image(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    query: Result<Query<EnhanceOptions>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    match enhance_upload(&state, &request_id, &headers, query, multipart).await {
        Ok(response) => response,
        Err(e) => e.into_response_with_id(&request_id),
    }
}

async fn enhance_upload(
    state: &AppState,
    request_id: &str,
    headers: &HeaderMap,
    query: Result<Query<EnhanceOptions>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let Query(options) = query
        .map_err(|e| AppError::ValidationError(format!("Invalid query: {}", e.body_text())))?;
    let mut multipart = multipart
        .map_err(|e| AppError::ValidationError(format!("Invalid upload: {}", e.body_text())))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| read_error(state, headers, e))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        // Bodies over the transport limit fail here rather than in the pipeline.
        let data = field.bytes().await.map_err(|e| read_error(state, headers, e))?;

        let output = state.enhance.enhance(request_id, data, options).await?;

        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/png".to_string()),
                (header::CONTENT_LENGTH, output.png.len().to_string()),
            ],
            output.png,
        )
            .into_response());
    }

    Err(AppError::ValidationError(format!(
        "Multipart field '{}' is required",
        IMAGE_FIELD
    )))
}

fn read_error(state: &AppState, headers: &HeaderMap, err: impl std::fmt::Display) -> AppError {
    let max = state.config.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match declared {
        Some(len) if len > max => AppError::ValidationError(format!(
            "Upload is {} bytes, maximum allowed is {} bytes: {}",
            len, max, err
        )),
        _ => AppError::ValidationError(format!(
            "Failed to read upload (max {} bytes): {}",
            max, err
        )),
    }
}
