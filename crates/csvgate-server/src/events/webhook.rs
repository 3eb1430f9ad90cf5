use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{EventsConfig, FileUploaded, Producer};

/// Header carrying the topic an event belongs to
pub const TOPIC_HEADER: &str = "x-topic";

/// [`Producer`] that POSTs each event as JSON to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookProducer {
    client: Client,
    endpoint: String,
    topic: String,
}

impl WebhookProducer {
    /// Create a producer whose requests give up after `config.timeout_secs`
    pub fn new(config: &EventsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build events HTTP client")?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &EventsConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            topic: config.topic.clone(),
        }
    }
}

#[async_trait]
impl Producer for WebhookProducer {
    #[instrument(skip(self, event), fields(filename = %event.filename))]
    async fn file_uploaded(&self, event: &FileUploaded) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(TOPIC_HEADER, &self.topic)
            .json(event)
            .send()
            .await
            .with_context(|| format!("Failed to send event to {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Event endpoint {} responded with {}", self.endpoint, status);
        }

        debug!(topic = %self.topic, %status, "Published upload event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> EventsConfig {
        EventsConfig {
            endpoint: format!("{}/events", server.uri()),
            topic: "file-uploaded".to_string(),
            timeout_secs: 1,
        }
    }

    fn event() -> FileUploaded {
        FileUploaded {
            filename: "AF001EW.csv".to_string(),
            time: 1_700_000_000,
            s3_path: "s3://csvgate-uploads/AF001EW.csv".to_string(),
        }
    }

    #[tokio::test]
    async fn test_posts_event_with_topic_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(header(TOPIC_HEADER, "file-uploaded"))
            .and(body_json(serde_json::json!({
                "filename": "AF001EW.csv",
                "time": 1_700_000_000,
                "s3Path": "s3://csvgate-uploads/AF001EW.csv",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let producer = WebhookProducer::new(&config(&server)).unwrap();
        producer.file_uploaded(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let producer = WebhookProducer::new(&config(&server)).unwrap();
        let err = producer.file_uploaded(&event()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let producer = WebhookProducer::new(&config(&server)).unwrap();
        let err = producer.file_uploaded(&event()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to send event"));
    }
}
