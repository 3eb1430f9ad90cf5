//! Configuration management

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::events::EventsConfig;
use crate::storage::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 20019;

/// Default request timeout for uploads in seconds.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

/// Longest request timeout accepted for uploads (one hour).
pub const MAX_UPLOAD_TIMEOUT_SECS: u64 = 3600;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Upload Pipeline Constants
// ============================================================================

/// Default number of rows per block marker.
pub const DEFAULT_BLOCK_SIZE: u64 = 50_000;

/// Default number of rows between validator progress events.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 50_000;

/// Default extension that marks an upload as an archive.
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "zip";

/// Default extension required of the entry inside an archive.
pub const DEFAULT_ENTRY_EXTENSION: &str = "csv";

/// Default read size for spooled files (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default cap on a single CSV record (1 MiB).
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub events: EventsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory spool files are created in
    pub temp_dir: PathBuf,
    pub block_size: u64,
    pub progress_interval: u64,
    /// First-field value that marks a leading header row to drop
    pub header_sentinel: Option<String>,
    pub archive_extension: String,
    pub entry_extension: String,
    pub chunk_size: usize,
    /// Longest CSV record accepted, in bytes
    pub max_record_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: env::temp_dir(),
            block_size: DEFAULT_BLOCK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            header_sentinel: None,
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            entry_extension: DEFAULT_ENTRY_EXTENSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var("CSVGATE_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: parse_env("CSVGATE_PORT", DEFAULT_SERVER_PORT),
                upload_timeout_secs: parse_env("UPLOAD_TIMEOUT", DEFAULT_UPLOAD_TIMEOUT_SECS),
                shutdown_timeout_secs: parse_env(
                    "CSVGATE_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            upload: UploadConfig {
                temp_dir: env::var("UPLOAD_TEMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir()),
                block_size: parse_env("UPLOAD_BLOCK_SIZE", DEFAULT_BLOCK_SIZE),
                progress_interval: parse_env("UPLOAD_PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL),
                header_sentinel: env::var("UPLOAD_HEADER_SENTINEL")
                    .ok()
                    .filter(|s| !s.is_empty()),
                archive_extension: env::var("UPLOAD_ARCHIVE_EXTENSION")
                    .unwrap_or_else(|_| DEFAULT_ARCHIVE_EXTENSION.to_string()),
                entry_extension: env::var("UPLOAD_ENTRY_EXTENSION")
                    .unwrap_or_else(|_| DEFAULT_ENTRY_EXTENSION.to_string()),
                chunk_size: parse_env("UPLOAD_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                max_record_bytes: parse_env("UPLOAD_MAX_RECORD_BYTES", DEFAULT_MAX_RECORD_BYTES),
            },
            storage: StorageConfig::from_env(),
            events: EventsConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.server.upload_timeout_secs > MAX_UPLOAD_TIMEOUT_SECS {
            anyhow::bail!(
                "Upload timeout ({}s) cannot exceed {}s",
                self.server.upload_timeout_secs,
                MAX_UPLOAD_TIMEOUT_SECS
            );
        }

        if self.upload.block_size == 0 {
            anyhow::bail!("Upload block_size must be greater than 0");
        }

        if self.upload.progress_interval == 0 {
            anyhow::bail!("Upload progress_interval must be greater than 0");
        }

        if self.upload.chunk_size == 0 {
            anyhow::bail!("Upload chunk_size must be greater than 0");
        }

        if self.upload.max_record_bytes == 0 {
            anyhow::bail!("Upload max_record_bytes must be greater than 0");
        }

        if self.upload.archive_extension.is_empty() || self.upload.entry_extension.is_empty() {
            anyhow::bail!("Archive and entry extensions cannot be empty");
        }

        self.storage.validate()?;
        self.events.validate()?;

        Ok(())
    }
}
