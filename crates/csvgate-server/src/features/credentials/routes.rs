use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::api::response::{ApiResponse, ErrorResponse};
use crate::pipeline::base_name;
use crate::storage::Presigner;

pub fn credentials_routes() -> Router<Arc<dyn Presigner>> {
    Router::new().route("/credentials", get(upload_credentials))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsQuery {
    #[serde(default)]
    pub filename: String,
}

/// Hand out a time-limited URL the client can PUT `filename` to.
///
/// Files uploaded this way skip validation and no event is produced.
#[tracing::instrument(skip(presigner))]
async fn upload_credentials(
    State(presigner): State<Arc<dyn Presigner>>,
    Query(query): Query<CredentialsQuery>,
) -> Result<Response, CredentialsApiError> {
    let name = base_name(&query.filename).ok_or(CredentialsApiError::FilenameRequired)?;

    let upload = presigner
        .presign_upload(name)
        .await
        .map_err(CredentialsApiError::Storage)?;

    tracing::debug!(
        key = %upload.key,
        expires_in = upload.expires_in,
        "Direct upload URL generated via API"
    );

    Ok(ApiResponse::success(upload).into_response())
}

#[derive(Debug, Error)]
enum CredentialsApiError {
    #[error("Filename is required")]
    FilenameRequired,

    #[error("Failed to presign upload: {0:#}")]
    Storage(anyhow::Error),
}

impl IntoResponse for CredentialsApiError {
    fn into_response(self) -> Response {
        match self {
            CredentialsApiError::FilenameRequired => {
                let error = ErrorResponse::new("VALIDATION_ERROR", self.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            },
            CredentialsApiError::Storage(_) => {
                tracing::error!("Storage error during presign: {}", self);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
        }
    }
}
