//! Feature modules implementing the csvgate API
//!
//! - **uploads**: multipart CSV upload intake
//! - **credentials**: presigned URLs for uploading straight to storage

pub mod credentials;
pub mod uploads;

use axum::Router;
use std::sync::Arc;

use crate::pipeline::Uploader;
use crate::storage::Presigner;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub uploader: Uploader,
    pub presigner: Arc<dyn Presigner>,
}

/// Routes of every feature, each bound to the part of [`FeatureState`] it needs
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(uploads::uploads_routes().with_state(state.uploader))
        .merge(credentials::credentials_routes().with_state(state.presigner))
}
