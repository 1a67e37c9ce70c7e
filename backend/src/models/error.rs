use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetail {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub request_id: String,
}

const GENERIC_FAILURE: &str = "Enhancement failed. Please try again later.";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Image is {actual} bytes, maximum allowed is {max} bytes")]
    PayloadTooLarge { actual: u64, max: u64 },

    #[error("Image is {width}x{height}, maximum allowed is {max_width}x{max_height}")]
    DimensionsTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot decode image: {0}")]
    DecodeError(String),

    #[error("Timed out after {waited_secs}s waiting for an inference slot")]
    InferenceTimeout { waited_secs: u64 },

    #[error("Processing failed: {0}")]
    ProcessingError(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Validation failures are the caller's to fix; everything else is ours.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::PayloadTooLarge { .. }
                | AppError::DimensionsTooLarge { .. }
                | AppError::ValidationError(_)
                | AppError::DecodeError(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::PayloadTooLarge { .. }
            | AppError::DimensionsTooLarge { .. }
            | AppError::ValidationError(_)
            | AppError::DecodeError(_) => StatusCode::BAD_REQUEST,
            AppError::InferenceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::ProcessingError(_)
            | AppError::InvariantViolation(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_problem_detail(&self, request_id: &str) -> ProblemDetail {
        let (code, title, detail) = match self {
            AppError::PayloadTooLarge { .. } => (
                "IMAGE_TOO_LARGE",
                "Image Too Large",
                self.to_string(),
            ),
            AppError::DimensionsTooLarge { .. } => (
                "DIMENSIONS_TOO_LARGE",
                "Image Dimensions Too Large",
                format!("{}. Retry with resize=true to shrink it automatically", self),
            ),
            AppError::ValidationError(detail) => (
                "VALIDATION_ERROR",
                "Validation Error",
                detail.clone(),
            ),
            AppError::DecodeError(_) => (
                "DECODE_ERROR",
                "Unsupported Image",
                self.to_string(),
            ),
            AppError::InferenceTimeout { .. } => (
                "INFERENCE_TIMEOUT",
                "Inference Timeout",
                "The server is busy; no inference slot became free in time".to_string(),
            ),
            AppError::ProcessingError(_) => (
                "PROCESSING_ERROR",
                "Processing Error",
                GENERIC_FAILURE.to_string(),
            ),
            AppError::InvariantViolation(_) => (
                "INTERNAL_ERROR",
                "Internal Error",
                GENERIC_FAILURE.to_string(),
            ),
            AppError::Internal(_) => (
                "INTERNAL_ERROR",
                "Internal Error",
                GENERIC_FAILURE.to_string(),
            ),
        };

        ProblemDetail {
            problem_type: format!("https://enhancer.dev/problems/{}", code.to_lowercase()),
            title: title.to_string(),
            status: self.status().as_u16(),
            detail,
            code: code.to_string(),
            request_id: request_id.to_string(),
        }
    }
}

impl AppError {
    /// Render the problem body under the id the request was logged with.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let problem = self.to_problem_detail(request_id);

        if !self.is_client_error() {
            tracing::error!(request_id = %request_id, cause = %self, "Request failed");
        }

        let mut response = (self.status(), Json(problem)).into_response();
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert("X-Request-Id", value);
        }
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.into_response_with_id(&request_id)
    }
}
