//! Shared fixtures for csvgate-server integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use csvgate_server::config::UploadConfig;
use csvgate_server::events::{FileUploaded, Producer};
use csvgate_server::pipeline::{drain, ByteSource, PipelineError};
use csvgate_server::storage::{PresignedUpload, Presigner, Store};
use csvgate_server::Uploader;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One call to [`MemoryStore::save`]
#[derive(Debug, Clone)]
pub struct Saved {
    pub key: String,
    pub bytes: Vec<u8>,
    /// Error item that ended the body, if any
    pub error: Option<PipelineError>,
}

/// In-memory [`Store`] that keeps everything it reads
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<Saved>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl MemoryStore {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Store that sleeps before reading each body
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<Saved> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, key: &str, body: ByteSource) -> anyhow::Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let (bytes, error) = drain(body).await;
        self.saved.lock().unwrap().push(Saved {
            key: key.to_string(),
            bytes,
            error: error.clone(),
        });

        if let Some(err) = error {
            return Err(err.into());
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        Ok(format!("memory://uploads/{key}"))
    }
}

/// [`Producer`] that records every event it is handed
#[derive(Debug, Default)]
pub struct RecordingProducer {
    events: Mutex<Vec<FileUploaded>>,
    fail: bool,
}

impl RecordingProducer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<FileUploaded> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Producer for RecordingProducer {
    async fn file_uploaded(&self, event: &FileUploaded) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            anyhow::bail!("broker unavailable");
        }
        Ok(())
    }
}

/// [`Presigner`] that signs nothing and remembers what it was asked for
#[derive(Debug, Default)]
pub struct FakePresigner {
    requested: Mutex<Vec<String>>,
}

impl FakePresigner {
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Presigner for FakePresigner {
    async fn presign_upload(&self, name: &str) -> anyhow::Result<PresignedUpload> {
        self.requested.lock().unwrap().push(name.to_string());
        Ok(PresignedUpload {
            url: format!("https://uploads.example.com/{name}?X-Amz-Signature=fake"),
            key: name.to_string(),
            location: format!("memory://uploads/{name}"),
            expires_in: 300,
        })
    }
}

pub fn upload_config(temp_dir: &Path, block_size: u64) -> UploadConfig {
    UploadConfig {
        temp_dir: temp_dir.to_path_buf(),
        block_size,
        chunk_size: 1024,
        ..UploadConfig::default()
    }
}

pub fn uploader(
    config: UploadConfig,
    store: &Arc<MemoryStore>,
    producer: &Arc<RecordingProducer>,
) -> Uploader {
    Uploader::new(config, store.clone(), producer.clone())
}

/// `count` rows of three fields, numbered from `first`
pub fn csv_rows(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("{i},name-{i},value-{i}\n"))
        .collect()
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn body(data: impl Into<bytes::Bytes>) -> impl futures::Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    futures::stream::iter(vec![Ok(data.into())])
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
