//! Pipeline error taxonomy

use thiserror::Error;

/// A record that breaks the column contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralViolation {
    #[error("Wrong number of fields in file at row {row} - must be a multiple of 3, but was {fields}")]
    FieldCount { row: u64, fields: usize },

    #[error("Row {row} in file is longer than {limit} bytes")]
    RecordTooLong { row: u64, limit: usize },
}

impl StructuralViolation {
    /// 1-based index of the offending row
    pub fn row(&self) -> u64 {
        match self {
            Self::FieldCount { row, .. } | Self::RecordTooLong { row, .. } => *row,
        }
    }
}

/// An archive whose shape is not a single data entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    #[error("Unable to decode zip archive: {0}")]
    Unreadable(String),

    #[error("Expected exactly one file in zip archive, found {found}")]
    EntryCount { found: usize },

    #[error("Unsupported file in zip archive: {name}")]
    UnsupportedEntry { name: String },
}

/// Terminal condition of one upload
///
/// Cloneable so the same error can close a stream handoff and be reported by
/// the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Read failure: {0}")]
    Read(String),

    #[error(transparent)]
    Structural(#[from] StructuralViolation),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Store failure: {0}")]
    Store(String),

    #[error("Notify failure: {0}")]
    Notify(String),
}

impl PipelineError {
    /// Stable label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read(_) => "read_failure",
            Self::Structural(_) => "structural_violation",
            Self::Archive(_) => "archive_shape_violation",
            Self::Store(_) => "store_failure",
            Self::Notify(_) => "notify_failure",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Read(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_message_names_row_and_count() {
        let err = PipelineError::from(StructuralViolation::FieldCount { row: 37, fields: 4 });
        assert_eq!(
            err.to_string(),
            "Wrong number of fields in file at row 37 - must be a multiple of 3, but was 4"
        );
        assert_eq!(err.kind(), "structural_violation");
    }

    #[test]
    fn test_io_error_is_read_failure() {
        let err: PipelineError = std::io::Error::other("disk full").into();
        assert!(matches!(err, PipelineError::Read(ref msg) if msg.contains("disk full")));
    }

    #[test]
    fn test_violation_row() {
        assert_eq!(StructuralViolation::RecordTooLong { row: 5, limit: 64 }.row(), 5);
    }
}
