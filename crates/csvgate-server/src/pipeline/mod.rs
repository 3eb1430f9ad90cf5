//! Streaming upload pipeline
//!
//! An upload is spooled to a temp file, then streamed through three stages
//! before it reaches the [`Store`](crate::storage::Store):
//!
//! ```text
//! SpooledFile -> archive::normalize -> validator::validate -> markers::record_markers -> Store
//! ```
//!
//! Each stage runs as its own task and hands chunks to the next one through a
//! single-slot [`handoff`], so the whole chain advances only as fast as the
//! store reads. A stage that fails ends its output with an `Err` item; a stage
//! whose consumer has gone away stops and drops its own input, which unwinds
//! the stages above it.

pub mod archive;
pub mod error;
pub mod markers;
pub mod orchestrator;
pub mod spool;
pub mod validator;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;

pub use archive::{normalize, ArchiveHandle, ArchivePolicy, Normalized};
pub use error::{ArchiveError, PipelineError, StructuralViolation};
pub use markers::{record_markers, MarkerHandle, MarkerRecorder};
pub use orchestrator::{PendingUpload, UploadReport, UploadStage, Uploader};
pub(crate) use orchestrator::base_name;
pub use spool::{spool, SpooledFile};
pub use validator::{validate, RowValidator, ValidatorConfig};

/// A stream of raw byte chunks that ends cleanly or with one terminal error
pub type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes, PipelineError>> + Send>>;

/// An uploaded file as it moves between stages
pub struct UploadArtifact {
    pub name: String,
    pub content: ByteSource,
}

impl std::fmt::Debug for UploadArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadArtifact")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Writing half of a [`handoff`]
#[derive(Debug)]
pub struct HandoffSender {
    tx: mpsc::Sender<Result<Bytes, PipelineError>>,
}

impl HandoffSender {
    /// Hand a chunk downstream, waiting until the slot is free.
    ///
    /// Returns `false` once the consumer has been dropped.
    pub async fn send(&self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Blocking variant of [`send`](Self::send) for `spawn_blocking` readers
    pub fn blocking_send(&self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.blocking_send(Ok(chunk)).is_ok()
    }

    /// Terminate the stream with `err`
    pub async fn fail(self, err: PipelineError) {
        let _ = self.tx.send(Err(err)).await;
    }

    pub fn blocking_fail(self, err: PipelineError) {
        let _ = self.tx.blocking_send(Err(err));
    }

    /// Resolves once the consumer has been dropped
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Create a single-slot, single-producer single-consumer byte handoff.
///
/// Dropping the [`HandoffSender`] ends the stream cleanly.
pub fn handoff() -> (HandoffSender, ByteSource) {
    let (tx, mut rx) = mpsc::channel(1);
    let source = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (HandoffSender { tx }, Box::pin(source))
}

/// Outcome of waiting on an upstream source
pub(crate) enum Pull {
    Item(Result<Bytes, PipelineError>),
    End,
    Closed,
}

/// Next upstream item, giving up early if the downstream consumer is gone
pub(crate) async fn pull(upstream: &mut ByteSource, downstream: &HandoffSender) -> Pull {
    tokio::select! {
        biased;
        _ = downstream.closed() => Pull::Closed,
        item = upstream.next() => match item {
            Some(item) => Pull::Item(item),
            None => Pull::End,
        },
    }
}

/// Lift an in-memory buffer into a [`ByteSource`], split into `chunk_size` pieces
pub fn source_from_bytes(data: impl Into<Bytes>, chunk_size: usize) -> ByteSource {
    let data: Bytes = data.into();
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Result<Bytes, PipelineError>> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

/// Drain a source into memory, returning the bytes seen and the terminal error if any
pub async fn drain(mut source: ByteSource) -> (Vec<u8>, Option<PipelineError>) {
    let mut out = Vec::new();
    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(err) => return (out, Some(err)),
        }
    }
    (out, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handoff_delivers_in_order() {
        let (tx, source) = handoff();
        tokio::spawn(async move {
            for part in ["a,b,c\n", "d,e,f\n"] {
                assert!(tx.send(Bytes::from_static(part.as_bytes())).await);
            }
        });

        let (bytes, err) = drain(source).await;
        assert_eq!(bytes, b"a,b,c\nd,e,f\n");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_handoff_error_terminates_stream() {
        let (tx, source) = handoff();
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"x,y,z\n")).await;
            tx.fail(PipelineError::Read("disk gone".into())).await;
        });

        let (bytes, err) = drain(source).await;
        assert_eq!(bytes, b"x,y,z\n");
        assert!(matches!(err, Some(PipelineError::Read(_))));
    }

    #[tokio::test]
    async fn test_send_reports_dropped_consumer() {
        let (tx, source) = handoff();
        drop(source);
        assert!(!tx.send(Bytes::from_static(b"lost")).await);
    }

    #[tokio::test]
    async fn test_sender_waits_for_reader() {
        let (tx, mut source) = handoff();
        assert!(tx.send(Bytes::from_static(b"1,2,3\n")).await);

        // the single slot is full until the reader takes a chunk
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            tx.send(Bytes::from_static(b"4,5,6\n")),
        )
        .await;
        assert!(blocked.is_err());

        let first = source.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"1,2,3\n");
        assert!(tx.send(Bytes::from_static(b"4,5,6\n")).await);
    }

    #[tokio::test]
    async fn test_source_from_bytes_chunks() {
        let (bytes, err) = drain(source_from_bytes(&b"0123456789"[..], 3)).await;
        assert_eq!(bytes, b"0123456789");
        assert!(err.is_none());
    }
}
