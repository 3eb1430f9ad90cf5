//! Durable storage for validated uploads

use async_trait::async_trait;
use serde::Serialize;

use crate::pipeline::ByteSource;

pub mod config;
pub mod s3;

pub use config::{Destination, StorageConfig};
pub use s3::S3Store;

/// Somewhere a validated upload can be persisted
#[async_trait]
pub trait Store: Send + Sync {
    /// Read `body` to completion and persist exactly what was read under `key`.
    ///
    /// Returns the stored artifact's location. An `Err` item in `body` must
    /// fail the save and leave nothing behind under `key`.
    async fn save(&self, key: &str, body: ByteSource) -> anyhow::Result<String>;
}

/// A time-limited URL a client can PUT a file to directly
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUpload {
    pub url: String,
    pub key: String,
    /// Where the file will be once uploaded
    pub location: String,
    pub expires_in: u64,
}

/// Hands out direct upload URLs, bypassing the validation pipeline
#[async_trait]
pub trait Presigner: Send + Sync {
    async fn presign_upload(&self, name: &str) -> anyhow::Result<PresignedUpload>;
}
