//! csvgate Common Library
//!
//! Shared types, logging bootstrap, and error handling for the csvgate
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`GateError`] and the [`Result`] alias
//! - **Logging**: [`logging::init_logging`] driven by [`logging::LogConfig`]
//! - **Types**: [`types::BlockMarker`] and the [`types::FileUploaded`] event
//!
//! # Example
//!
//! ```no_run
//! use csvgate_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> csvgate_common::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{GateError, Result};
pub use types::{BlockMarker, FileUploaded};
