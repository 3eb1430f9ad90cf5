//! Upload notifications

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;

pub mod webhook;

pub use csvgate_common::FileUploaded;
pub use webhook::WebhookProducer;

/// Default endpoint events are posted to
pub const DEFAULT_EVENTS_URL: &str = "http://localhost:8085/events";

/// Default topic upload events are published on
pub const DEFAULT_TOPIC_NAME: &str = "file-uploaded";

/// Default request timeout for event delivery, in seconds
pub const DEFAULT_EVENTS_TIMEOUT_SECS: u64 = 10;

/// Publishes a message once an upload has been stored
#[async_trait]
pub trait Producer: Send + Sync {
    async fn file_uploaded(&self, event: &FileUploaded) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub endpoint: String,
    pub topic: String,
    pub timeout_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_EVENTS_URL.to_string(),
            topic: DEFAULT_TOPIC_NAME.to_string(),
            timeout_secs: DEFAULT_EVENTS_TIMEOUT_SECS,
        }
    }
}

impl EventsConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("EVENTS_URL").unwrap_or_else(|_| DEFAULT_EVENTS_URL.to_string()),
            topic: env::var("TOPIC_NAME").unwrap_or_else(|_| DEFAULT_TOPIC_NAME.to_string()),
            timeout_secs: env::var("EVENTS_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_EVENTS_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid events URL {}: {}", self.endpoint, e))?;
        if self.topic.trim().is_empty() {
            anyhow::bail!("Event topic cannot be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("Events timeout must be greater than 0");
        }
        Ok(())
    }
}
