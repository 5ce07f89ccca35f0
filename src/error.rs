use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Every way a verify request can fail. Each variant maps to exactly one HTTP status.
#[derive(Error, Debug)]
pub enum FaceMatchError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to stage upload: {0}")]
    Storage(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    ImageDecode(String),
    #[error("{0}")]
    Engine(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FaceMatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            FaceMatchError::Validation(_) => StatusCode::BAD_REQUEST,
            FaceMatchError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            // Undecodable uploads stay 500 alongside staging and engine failures.
            FaceMatchError::Storage(_)
            | FaceMatchError::ImageDecode(_)
            | FaceMatchError::Engine(_)
            | FaceMatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FaceMatchError::Validation(_) => "validation",
            FaceMatchError::Storage(_) => "storage",
            FaceMatchError::ImageDecode(_) => "image_decode",
            FaceMatchError::Engine(_) => "engine",
            FaceMatchError::PayloadTooLarge(_) => "payload_too_large",
            FaceMatchError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for FaceMatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            FaceMatchError::Validation(message) | FaceMatchError::PayloadTooLarge(message) => (
                status,
                Json(serde_json::json!({
                    "status": status.as_u16(),
                    "message": message
                })),
            )
                .into_response(),
            other => (status, Json(serde_json::json!({ "detail": other.to_string() }))).into_response(),
        }
    }
}
