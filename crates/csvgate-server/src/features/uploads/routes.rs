use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::pipeline::Uploader;

/// Multipart field that carries the uploaded file
pub const FILE_FIELD: &str = "file";

pub fn uploads_routes() -> Router<Uploader> {
    Router::new().route("/", post(upload_file).layer(DefaultBodyLimit::disable()))
}

#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub upload_id: Uuid,
    pub filename: String,
}

/// Spool the `file` field and hand it to the uploader.
///
/// The reply comes back once the body is on disk; storing and notifying
/// happen afterwards and are only reported through logs.
#[tracing::instrument(skip(uploader, multipart))]
async fn upload_file(
    State(uploader): State<Uploader>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Multipart(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        let pending = uploader.accept(&name, field).await?;
        tracing::info!(
            upload_id = %pending.upload_id,
            bytes = pending.size(),
            "Upload accepted via API"
        );
        let accepted = UploadAccepted {
            upload_id: pending.upload_id,
            filename: pending.name.clone(),
        };
        uploader.dispatch(pending);

        return Ok(ApiResponse::accepted(accepted).into_response());
    }

    Err(AppError::MissingFile)
}
