//! csvgate Server Library
//!
//! HTTP service that takes CSV uploads, checks their structure while
//! streaming them to S3, and announces each stored file.
//!
//! # Overview
//!
//! - **Pipeline**: spool, archive normalization, structural validation and
//!   block markers, chained as concurrent stages ([`pipeline`])
//! - **Storage**: the [`storage::Store`] and [`storage::Presigner`] capabilities
//!   and their S3 implementation
//! - **Events**: the [`events::Producer`] capability and its webhook implementation
//! - **Configuration**: environment-based configuration management
//! - **Middleware**: request logging, timeouts and request ids
//!
//! # Example
//!
//! ```no_run
//! use csvgate_server::{api, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let state = api::build_state(&config).await?;
//!     let app = api::create_router(state, &config.server);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:20019").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod middleware;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use error::AppError;
pub use features::FeatureState;
pub use pipeline::{PipelineError, UploadReport, Uploader};
