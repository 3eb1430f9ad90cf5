//! Domain types shared between the pipeline and its collaborators

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Row and byte range of one block of an uploaded file.
///
/// Rows are 1-based, byte offsets are 0-based, and both `last_*` bounds are
/// inclusive. A sequence of markers for one file partitions its rows with no
/// gaps and no overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarker {
    pub block_number: u64,
    pub first_row: u64,
    pub last_row: u64,
    pub first_byte_offset: u64,
    pub last_byte_offset: u64,
}

impl BlockMarker {
    /// Open a marker for a block whose first row is `first_row`
    pub fn open(block_number: u64, first_row: u64, first_byte_offset: u64) -> Self {
        Self {
            block_number,
            first_row,
            last_row: first_row,
            first_byte_offset,
            last_byte_offset: first_byte_offset,
        }
    }

    pub fn row_count(&self) -> u64 {
        self.last_row - self.first_row + 1
    }

    pub fn byte_len(&self) -> u64 {
        self.last_byte_offset - self.first_byte_offset + 1
    }
}

/// Event published once an uploaded file is durably stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploaded {
    pub filename: String,
    /// Unix timestamp (seconds, UTC)
    pub time: i64,
    #[serde(rename = "s3Path")]
    pub s3_path: String,
}

impl FileUploaded {
    /// Build an event stamped with the current time
    pub fn now(filename: impl Into<String>, s3_path: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            time: Utc::now().timestamp(),
            s3_path: s3_path.into(),
        }
    }
}
