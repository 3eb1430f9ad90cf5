//! Per-upload control flow
//!
//! ```text
//! Spooling -> Normalizing -> Validating+Marking -> Storing -> Notifying -> Done
//! ```
//!
//! Any stage can fail the upload. Whatever happens, the spool file is removed
//! and the archive reader (if any) is released before [`Uploader::run`]
//! returns.

use bytes::Bytes;
use csvgate_common::{BlockMarker, FileUploaded};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::{
    normalize, record_markers, spool, validate, ArchiveHandle, ArchivePolicy, ByteSource,
    PipelineError, SpooledFile, ValidatorConfig,
};
use crate::config::UploadConfig;
use crate::events::Producer;
use crate::storage::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Spooling,
    Normalizing,
    ValidatingMarking,
    Storing,
    Notifying,
    Done,
}

impl Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Spooling => "spooling",
            Self::Normalizing => "normalizing",
            Self::ValidatingMarking => "validating+marking",
            Self::Storing => "storing",
            Self::Notifying => "notifying",
            Self::Done => "done",
        };
        f.write_str(stage)
    }
}

/// An upload whose body has been spooled and is ready to run
#[derive(Debug)]
pub struct PendingUpload {
    pub upload_id: Uuid,
    pub name: String,
    spool: SpooledFile,
}

impl PendingUpload {
    /// Spooled body size in bytes
    pub fn size(&self) -> u64 {
        self.spool.size()
    }
}

/// Outcome of a fully stored and announced upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub upload_id: Uuid,
    /// Stored artifact name; the entry name for archives
    pub name: String,
    pub location: String,
    pub bytes: u64,
    pub rows: u64,
    pub markers: Vec<BlockMarker>,
}

/// Remembers the first error item that passes through a stream
#[derive(Debug, Clone, Default)]
struct ErrorLatch(Arc<Mutex<Option<PipelineError>>>);

impl ErrorLatch {
    fn watch(&self, source: ByteSource) -> ByteSource {
        let latch = self.clone();
        Box::pin(source.inspect(move |item| {
            if let Err(err) = item {
                latch.set(err.clone());
            }
        }))
    }

    fn set(&self, err: PipelineError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(err);
        }
    }

    fn take(&self) -> Option<PipelineError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Runs uploads against a [`Store`] and a [`Producer`]
#[derive(Clone)]
pub struct Uploader {
    config: Arc<UploadConfig>,
    store: Arc<dyn Store>,
    producer: Arc<dyn Producer>,
    tasks: TaskTracker,
}

impl Uploader {
    pub fn new(config: UploadConfig, store: Arc<dyn Store>, producer: Arc<dyn Producer>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            producer,
            tasks: TaskTracker::new(),
        }
    }

    /// Spool `body` to disk under a fresh upload id.
    ///
    /// Only the last path component of `name` is kept.
    pub async fn accept<S, E>(&self, name: &str, body: S) -> Result<PendingUpload, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let upload_id = Uuid::new_v4();
        let base = base_name(name);
        let name = base.unwrap_or_default().to_string();
        let span = info_span!("upload", %upload_id, name = %name);

        async move {
            if base.is_none() {
                let err = PipelineError::Read("Upload has no file name".to_string());
                error!(stage = %UploadStage::Spooling, kind = err.kind(), error = %err, "Upload failed");
                return Err(err);
            }

            match spool(&self.config.temp_dir, body).await {
                Ok(spool) => {
                    info!(bytes = spool.size(), "Upload spooled");
                    Ok(PendingUpload {
                        upload_id,
                        name,
                        spool,
                    })
                },
                Err(err) => {
                    error!(stage = %UploadStage::Spooling, kind = err.kind(), error = %err, "Upload failed");
                    Err(err)
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Drive a spooled upload through every remaining stage
    pub async fn run(&self, pending: PendingUpload) -> Result<UploadReport, PipelineError> {
        let PendingUpload {
            upload_id,
            name,
            spool,
        } = pending;
        let span = info_span!("upload", %upload_id, name = %name);

        async move {
            let mut stage = UploadStage::Normalizing;
            let mut archive = None;

            let result = self
                .execute(upload_id, &spool, &name, &mut stage, &mut archive)
                .await;

            if let Some(handle) = archive {
                handle.release().await;
            }
            spool.remove();

            match &result {
                Ok(report) => info!(
                    location = %report.location,
                    bytes = report.bytes,
                    rows = report.rows,
                    blocks = report.markers.len(),
                    "Upload complete"
                ),
                Err(err) => error!(stage = %stage, kind = err.kind(), error = %err, "Upload failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run the upload on its own task; the outcome is logged there
    pub fn dispatch(&self, pending: PendingUpload) -> JoinHandle<Result<UploadReport, PipelineError>> {
        let uploader = self.clone();
        self.tasks.spawn(async move { uploader.run(pending).await })
    }

    /// Number of dispatched uploads still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop tracking new work and wait for dispatched uploads to finish.
    ///
    /// Returns `false` if `limit` elapsed first; those uploads are abandoned
    /// when the runtime shuts down.
    pub async fn drain(&self, limit: Duration) -> bool {
        self.tasks.close();
        tokio::time::timeout(limit, self.tasks.wait()).await.is_ok()
    }

    async fn execute(
        &self,
        upload_id: Uuid,
        spool: &SpooledFile,
        name: &str,
        stage: &mut UploadStage,
        archive: &mut Option<ArchiveHandle>,
    ) -> Result<UploadReport, PipelineError> {
        *stage = UploadStage::Normalizing;
        let normalized = normalize(spool, name, &ArchivePolicy::from(&*self.config)).await?;
        *archive = normalized.archive;
        let artifact = normalized.artifact;

        *stage = UploadStage::ValidatingMarking;
        let validated = validate(artifact.content, ValidatorConfig::from(&*self.config));
        let (marked, markers) = record_markers(validated, self.config.block_size);
        let latch = ErrorLatch::default();
        let body = latch.watch(marked);

        *stage = UploadStage::Storing;
        let stored = self.store.save(&artifact.name, body).await;
        let markers = markers.markers().await;

        // an error that ended the body outranks whatever the store made of it
        if let Some(err) = latch.take() {
            *stage = UploadStage::ValidatingMarking;
            return Err(err);
        }
        let location = stored.map_err(|e| PipelineError::Store(format!("{e:#}")))?;

        *stage = UploadStage::Notifying;
        let event = FileUploaded::now(artifact.name.clone(), location.clone());
        self.producer
            .file_uploaded(&event)
            .await
            .map_err(|e| PipelineError::Notify(format!("{e:#}")))?;

        *stage = UploadStage::Done;
        let last = markers.last();
        Ok(UploadReport {
            upload_id,
            name: artifact.name,
            location,
            bytes: last.map_or(0, |m| m.last_byte_offset + 1),
            rows: last.map_or(0, |m| m.last_row),
            markers,
        })
    }
}

/// Last path component of a client-supplied file name, if it names a file
pub(crate) fn base_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => None,
        base => Some(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("AF001EW.csv"), Some("AF001EW.csv"));
        assert_eq!(base_name("../../etc/AF001EW.csv"), Some("AF001EW.csv"));
        assert_eq!(base_name("C:\\uploads\\AF001EW.csv"), Some("AF001EW.csv"));
        assert_eq!(base_name("dir/"), None);
        assert_eq!(base_name("uploads/.."), None);
        assert_eq!(base_name(""), None);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(UploadStage::ValidatingMarking.to_string(), "validating+marking");
        assert_eq!(UploadStage::Done.to_string(), "done");
    }

    #[tokio::test]
    async fn test_latch_keeps_first_error() {
        let latch = ErrorLatch::default();
        let source: ByteSource = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"a,b,c\n")),
            Err(PipelineError::Read("first".into())),
            Err(PipelineError::Read("second".into())),
        ]));

        let mut watched = latch.watch(source);
        while watched.next().await.is_some() {}
        assert_eq!(latch.take(), Some(PipelineError::Read("first".into())));
        assert_eq!(latch.take(), None);
    }
}
