//! Block marker recording
//!
//! Physical lines are counted by their `\n` terminator; the recorder does not
//! look at quoting and is meant to run after the validator. Bytes pass through
//! unchanged.

use csvgate_common::BlockMarker;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use super::{handoff, pull, ByteSource, HandoffSender, Pull};

/// Row and byte bookkeeping behind [`record_markers`]
#[derive(Debug)]
pub struct MarkerRecorder {
    block_size: u64,
    rows: u64,
    bytes: u64,
    current: Option<BlockMarker>,
    markers: Vec<BlockMarker>,
    /// Bytes have been seen since the last line terminator
    line_open: bool,
}

impl MarkerRecorder {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
            rows: 0,
            bytes: 0,
            current: None,
            markers: Vec::new(),
            line_open: false,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn observe(&mut self, chunk: &[u8]) {
        let mut start = 0;
        while start < chunk.len() {
            let block_number = self.markers.len() as u64 + 1;
            let offset = self.bytes + start as u64;
            let first_row = self.rows + 1;
            let current = self
                .current
                .get_or_insert_with(|| BlockMarker::open(block_number, first_row, offset));

            let Some(pos) = chunk[start..].iter().position(|&b| b == b'\n') else {
                self.line_open = true;
                break;
            };
            let end = start + pos;
            self.rows += 1;
            current.last_row = self.rows;
            current.last_byte_offset = self.bytes + end as u64;
            self.line_open = false;
            start = end + 1;

            if self.rows % self.block_size == 0 {
                self.close();
            }
        }
        self.bytes += chunk.len() as u64;
    }

    /// Close the trailing partial block and return every marker in order
    pub fn finish(mut self) -> Vec<BlockMarker> {
        if self.line_open {
            self.rows += 1;
            if let Some(current) = self.current.as_mut() {
                current.last_row = self.rows;
                current.last_byte_offset = self.bytes - 1;
            }
            self.line_open = false;
        }
        self.close();
        self.markers
    }

    fn close(&mut self) {
        if let Some(marker) = self.current.take() {
            debug!(
                block = marker.block_number,
                first_row = marker.first_row,
                last_row = marker.last_row,
                first_byte = marker.first_byte_offset,
                last_byte = marker.last_byte_offset,
                "Closed block"
            );
            self.markers.push(marker);
        }
    }
}

/// Resolves to the recorded markers once the recorder task has ended
#[derive(Debug)]
pub struct MarkerHandle {
    task: JoinHandle<Vec<BlockMarker>>,
}

impl MarkerHandle {
    pub async fn markers(self) -> Vec<BlockMarker> {
        match self.task.await {
            Ok(markers) => markers,
            Err(e) => {
                warn!(error = %e, "Marker recorder task did not complete");
                Vec::new()
            },
        }
    }
}

/// Pass `upstream` through unchanged while recording a marker per `block_size` rows
pub fn record_markers(upstream: ByteSource, block_size: u64) -> (ByteSource, MarkerHandle) {
    let (tx, output) = handoff();
    let task = tokio::spawn(run(upstream, tx, MarkerRecorder::new(block_size)).in_current_span());
    (output, MarkerHandle { task })
}

async fn run(
    mut upstream: ByteSource,
    tx: HandoffSender,
    mut recorder: MarkerRecorder,
) -> Vec<BlockMarker> {
    loop {
        match pull(&mut upstream, &tx).await {
            Pull::Item(Ok(chunk)) => {
                if !tx.send(chunk.clone()).await {
                    return recorder.finish();
                }
                recorder.observe(&chunk);
            },
            Pull::Item(Err(err)) => {
                let markers = recorder.finish();
                tx.fail(err).await;
                return markers;
            },
            Pull::End => {
                debug!(rows = recorder.rows(), bytes = recorder.bytes(), "Recorded markers");
                return recorder.finish();
            },
            Pull::Closed => return recorder.finish(),
        }
    }
}
