//! Spooling request bodies to disk
//!
//! Archive inspection needs random access, which a request body cannot give,
//! so every upload is copied into a temp file before any stage reads it.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::PipelineError;

const SPOOL_PREFIX: &str = "file-upload-";

/// A request body held in a temp file
///
/// The file is deleted by [`remove`](Self::remove), or on drop.
#[derive(Debug)]
pub struct SpooledFile {
    file: NamedTempFile,
    size: u64,
}

impl SpooledFile {
    /// Create an empty, uniquely named spool file in `dir`
    pub fn create_in(dir: &Path, prefix: &str) -> Result<Self, PipelineError> {
        let file = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
        Ok(Self { file, size: 0 })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of bytes spooled
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fresh async read handle positioned at the start of the file
    pub async fn open(&self) -> Result<tokio::fs::File, PipelineError> {
        Ok(tokio::fs::File::open(self.path()).await?)
    }

    /// Fresh blocking read handle positioned at the start of the file
    pub fn open_std(&self) -> Result<std::fs::File, PipelineError> {
        Ok(std::fs::File::open(self.path())?)
    }

    /// Delete the file, logging rather than failing if that is not possible
    pub fn remove(self) {
        let path = self.path().to_path_buf();
        match self.file.close() {
            Ok(()) => debug!(path = %path.display(), "Removed spool file"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove spool file"),
        }
    }
}

/// Copy `body` into a new spool file under `dir`.
///
/// A body or disk error is a [`PipelineError::Read`]; the partial file is
/// deleted before returning.
pub async fn spool<S, E>(dir: &Path, body: S) -> Result<SpooledFile, PipelineError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut spooled = SpooledFile::create_in(dir, SPOOL_PREFIX)?;
    let mut file = tokio::fs::File::from_std(spooled.file.as_file().try_clone()?);

    futures::pin_mut!(body);
    let mut size = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| PipelineError::Read(e.to_string()))?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;

    spooled.size = size;
    debug!(path = %spooled.path().display(), bytes = size, "Spooled upload");
    Ok(spooled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn body(parts: Vec<Result<&'static str, &'static str>>) -> impl Stream<Item = Result<Bytes, String>> {
        futures::stream::iter(parts.into_iter().map(|p| {
            p.map(|s| Bytes::from_static(s.as_bytes()))
                .map_err(String::from)
        }))
    }

    #[tokio::test]
    async fn test_spool_then_open_reads_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let spooled = spool(dir.path(), body(vec![Ok("a,b,c\n"), Ok("d,e,f\n")]))
            .await
            .unwrap();
        assert_eq!(spooled.size(), 12);

        for _ in 0..2 {
            let mut contents = String::new();
            spooled.open().await.unwrap().read_to_string(&mut contents).await.unwrap();
            assert_eq!(contents, "a,b,c\nd,e,f\n");
        }
    }

    #[tokio::test]
    async fn test_spool_read_error_deletes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = spool(dir.path(), body(vec![Ok("a,b,c\n"), Err("client went away")])).await;

        assert!(matches!(result, Err(PipelineError::Read(ref msg)) if msg == "client went away"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let spooled = spool(dir.path(), body(vec![Ok("x")])).await.unwrap();
        let path = spooled.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SPOOL_PREFIX)));

        spooled.remove();
        assert!(!path.exists());
    }
}
