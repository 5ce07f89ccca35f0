use std::sync::Arc;

use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::FaceMatchError;
use crate::models::verification::VerifyResponse;
use crate::pipeline::staging::UploadedImage;
use crate::AppState;

pub const FILES_REQUIRED: &str = "file1 and file2 are required";

// Liveness probe
pub async fn index() -> impl IntoResponse {
    (StatusCode::OK, Json(0))
}

fn multipart_error(e: MultipartError) -> FaceMatchError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        FaceMatchError::PayloadTooLarge(e.body_text())
    } else {
        FaceMatchError::Validation(format!("invalid multipart payload: {}", e.body_text()))
    }
}

async fn read_uploads(mut multipart: Multipart) -> Result<(Option<UploadedImage>, Option<UploadedImage>), FaceMatchError> {
    let mut file1 = None;
    let mut file2 = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let slot = match field.name() {
            Some("file1") => &mut file1,
            Some("file2") => &mut file2,
            _ => continue,
        };
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        *slot = Some(UploadedImage { filename, content_type, bytes });
    }
    Ok((file1, file2))
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VerifyResponse>, FaceMatchError> {
    let multipart = multipart.map_err(|e| FaceMatchError::Validation(e.body_text()))?;
    let (file1, file2) = match read_uploads(multipart).await? {
        (Some(a), Some(b)) if a.is_present() && b.is_present() => (a, b),
        _ => return Err(FaceMatchError::Validation(FILES_REQUIRED.to_string())),
    };

    // The staged-file guards live inside the blocking task, so they are released
    // even if this future is dropped because the client went away.
    let pipeline = state.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || pipeline.run(&file1, &file2))
        .await
        .map_err(|e| FaceMatchError::Internal(format!("verification task failed: {}", e)))??;

    Ok(Json(VerifyResponse { status: StatusCode::OK.as_u16(), result }))
}
