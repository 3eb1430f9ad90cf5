pub mod response;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::config::{Config, ServerConfig};
use crate::events::WebhookProducer;
use crate::features::{self, FeatureState};
use crate::middleware;
use crate::pipeline::Uploader;
use crate::storage::S3Store;

/// Wire the uploader and presigner to S3 and the webhook producer from `config`
pub async fn build_state(config: &Config) -> anyhow::Result<FeatureState> {
    let store = Arc::new(S3Store::new(&config.storage).await?);
    let producer = WebhookProducer::new(&config.events)?;
    let uploader = Uploader::new(config.upload.clone(), store.clone(), Arc::new(producer));

    Ok(FeatureState {
        uploader,
        presigner: store,
    })
}

/// Create the application router with all routes and middleware
pub fn create_router(state: FeatureState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .merge(features::router(state))
        // Apply layers from innermost to outermost
        .layer(middleware::timeout_layer(config.upload_timeout_secs))
        .layer(middleware::propagate_request_id_layer())
        .layer(middleware::tracing_layer())
        .layer(middleware::request_id_layer())
}

async fn healthcheck() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
