//! Archive normalization
//!
//! A zip upload must hold exactly one entry with the accepted data extension;
//! that entry's decompressed content replaces the upload. Anything else is
//! passed through as spooled.

use bytes::Bytes;
use futures::StreamExt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn, Span};
use zip::ZipArchive;

use super::{handoff, ArchiveError, HandoffSender, PipelineError, SpooledFile, UploadArtifact};
use crate::config::UploadConfig;

#[derive(Debug, Clone)]
pub struct ArchivePolicy {
    /// Extension that marks an upload as an archive
    pub archive_extension: String,
    /// Extension the single archive entry must carry
    pub entry_extension: String,
    /// Read buffer size for spooled and decompressed content
    pub chunk_size: usize,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            archive_extension: "zip".to_string(),
            entry_extension: "csv".to_string(),
            chunk_size: 64 * 1024,
        }
    }
}

impl From<&UploadConfig> for ArchivePolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            archive_extension: config.archive_extension.clone(),
            entry_extension: config.entry_extension.clone(),
            chunk_size: config.chunk_size,
        }
    }
}

/// Case-insensitive extension check on a file name
pub fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Reader task over an opened archive entry
#[derive(Debug)]
pub struct ArchiveHandle {
    task: JoinHandle<()>,
}

impl ArchiveHandle {
    /// Wait for the entry reader to stop and its file handle to close.
    ///
    /// The reader stops on its own once its output has been dropped.
    pub async fn release(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Archive reader task did not complete");
        }
    }
}

pub struct Normalized {
    pub artifact: UploadArtifact,
    /// Set when the upload was an archive
    pub archive: Option<ArchiveHandle>,
}

/// Turn a spooled upload into the artifact the rest of the pipeline reads.
///
/// Only the archive's shape is checked here: one entry with the accepted
/// extension. Its content is not inspected.
pub async fn normalize(
    spooled: &SpooledFile,
    name: &str,
    policy: &ArchivePolicy,
) -> Result<Normalized, PipelineError> {
    if !has_extension(name, &policy.archive_extension) {
        let file = spooled.open().await?;
        let content = ReaderStream::with_capacity(file, policy.chunk_size.max(1))
            .map(|chunk| chunk.map_err(PipelineError::from));
        return Ok(Normalized {
            artifact: UploadArtifact {
                name: name.to_string(),
                content: Box::pin(content),
            },
            archive: None,
        });
    }

    let file = spooled.open_std()?;
    let entry_extension = policy.entry_extension.clone();
    let (archive, entry_name) =
        tokio::task::spawn_blocking(move || open_single_entry(file, &entry_extension))
            .await
            .map_err(|e| PipelineError::Read(e.to_string()))??;
    debug!(archive = name, entry = %entry_name, "Opened archive entry");

    let (tx, content) = handoff();
    let chunk_size = policy.chunk_size.max(1);
    let span = Span::current();
    let task = tokio::task::spawn_blocking(move || {
        span.in_scope(|| stream_entry(archive, tx, chunk_size))
    });

    Ok(Normalized {
        artifact: UploadArtifact {
            name: entry_name,
            content,
        },
        archive: Some(ArchiveHandle { task }),
    })
}

/// Open `file` as a zip and check it holds exactly one acceptable entry
fn open_single_entry(
    file: File,
    entry_extension: &str,
) -> Result<(ZipArchive<File>, String), PipelineError> {
    let archive = ZipArchive::new(file).map_err(|e| ArchiveError::Unreadable(e.to_string()))?;
    if archive.len() != 1 {
        return Err(ArchiveError::EntryCount {
            found: archive.len(),
        }
        .into());
    }

    let entry = archive.file_names().next().unwrap_or_default();
    if !has_extension(entry, entry_extension) {
        return Err(ArchiveError::UnsupportedEntry {
            name: entry.to_string(),
        }
        .into());
    }

    // entries may sit in a folder inside the archive
    let name = Path::new(entry)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(entry)
        .to_string();
    Ok((archive, name))
}

fn stream_entry(mut archive: ZipArchive<File>, tx: HandoffSender, chunk_size: usize) {
    let mut entry = match archive.by_index(0) {
        Ok(entry) => entry,
        Err(e) => {
            tx.blocking_fail(ArchiveError::Unreadable(e.to_string()).into());
            return;
        },
    };

    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                if !tx.blocking_send(Bytes::copy_from_slice(&buf[..n])) {
                    debug!(bytes = total, "Archive entry reader stopped early");
                    return;
                }
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tx.blocking_fail(e.into());
                return;
            },
        }
    }
    debug!(bytes = total, "Finished reading archive entry");
}
