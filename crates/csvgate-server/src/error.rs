//! HTTP error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::pipeline::PipelineError;

/// Message returned for every upload the service could not take in
pub const READ_FAILURE_MESSAGE: &str = "Failed to read upload file from the request.";

/// Errors surfaced to HTTP clients
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read upload: {0}")]
    ReadFailure(#[from] PipelineError),

    #[error("Malformed multipart request: {0}")]
    Multipart(String),

    #[error("Request has no file field")]
    MissingFile,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            // already logged by the uploader
            AppError::ReadFailure(_) => (StatusCode::BAD_REQUEST, "READ_FAILURE"),
            AppError::Multipart(ref message) => {
                tracing::warn!("Multipart error: {}", message);
                (StatusCode::BAD_REQUEST, "READ_FAILURE")
            },
            AppError::MissingFile => {
                tracing::warn!("Upload request without a file field");
                (StatusCode::BAD_REQUEST, "READ_FAILURE")
            },
        };

        (status, Json(ErrorResponse::new(code, READ_FAILURE_MESSAGE))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_read_failure_body() {
        let response = AppError::MissingFile.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "error": {
                    "code": "READ_FAILURE",
                    "message": "Failed to read upload file from the request."
                }
            })
        );
    }
}
