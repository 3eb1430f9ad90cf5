//! CSV structural validation
//!
//! [`validate`] re-emits the exact bytes of every record whose field count is
//! a non-zero multiple of [`FIELD_MULTIPLE`]. The first record that breaks the
//! rule ends the output with a [`StructuralViolation`]; nothing from that
//! record or any later one is emitted.
//!
//! Records are split by `csv_core`, which resumes across chunk boundaries and
//! reports how many input bytes each record consumed. Records end at `\n`
//! only, so they line up with the physical lines the marker stage counts.
//! Quoting is read leniently: a stray quote inside an unquoted field is data,
//! and a quoted field still open at end of input closes there.

use bytes::{Bytes, BytesMut};
use csv_core::{ReadRecordResult, Reader, ReaderBuilder, Terminator};
use tracing::{debug, Instrument};

use super::{handoff, pull, ByteSource, HandoffSender, Pull, StructuralViolation};
use crate::config::{UploadConfig, DEFAULT_MAX_RECORD_BYTES};

/// Every record must carry a multiple of this many fields
pub const FIELD_MULTIPLE: usize = 3;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Skip emitting the first record when its first field equals this value
    pub header_sentinel: Option<String>,
    /// Emit a progress event every this many rows
    pub progress_interval: u64,
    /// Longest record, terminator included, held while looking for its end
    pub max_record_bytes: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            header_sentinel: None,
            progress_interval: 50_000,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl From<&UploadConfig> for ValidatorConfig {
    fn from(config: &UploadConfig) -> Self {
        Self {
            header_sentinel: config.header_sentinel.clone(),
            progress_interval: config.progress_interval,
            max_record_bytes: config.max_record_bytes,
        }
    }
}

/// Output of feeding one chunk to a [`RowValidator`]
#[derive(Debug, Default)]
pub struct Validated {
    /// Bytes of the records that passed, in input order
    pub bytes: Bytes,
    /// Set when a record failed; no further input should be fed
    pub violation: Option<StructuralViolation>,
}

/// Synchronous core of the validation stage
#[derive(Debug)]
pub struct RowValidator {
    config: ValidatorConfig,
    reader: Reader,
    /// Raw bytes of the record currently being read
    carry: BytesMut,
    /// Unescaped field data of the current record
    fields: Vec<u8>,
    fields_len: usize,
    ends: Vec<usize>,
    ends_len: usize,
    rows: u64,
    emitted: u64,
}

impl RowValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let reader = ReaderBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .build();
        Self {
            config,
            reader,
            carry: BytesMut::new(),
            fields: vec![0; 1024],
            fields_len: 0,
            ends: vec![0; 16],
            ends_len: 0,
            rows: 0,
            emitted: 0,
        }
    }

    /// Records parsed so far, including a skipped header and a failing record
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn emitted_rows(&self) -> u64 {
        self.emitted
    }

    pub fn push(&mut self, chunk: &[u8]) -> Validated {
        let mut ready = BytesMut::new();
        let mut input = chunk;

        // an empty slice tells csv_core the input is over
        while !input.is_empty() {
            let (result, nin) = self.read(input);
            self.carry.extend_from_slice(&input[..nin]);
            input = &input[nin..];

            let outcome = match result {
                ReadRecordResult::Record => self.accept(&mut ready),
                ReadRecordResult::OutputFull => {
                    self.grow_fields();
                    Ok(())
                },
                ReadRecordResult::OutputEndsFull => {
                    self.grow_ends();
                    Ok(())
                },
                ReadRecordResult::InputEmpty | ReadRecordResult::End => Ok(()),
            };
            let outcome = outcome.and_then(|()| self.check_length());
            if let Err(violation) = outcome {
                return Validated {
                    bytes: ready.freeze(),
                    violation: Some(violation),
                };
            }
        }

        Validated {
            bytes: ready.freeze(),
            violation: None,
        }
    }

    /// Flush a trailing record that has no line terminator
    pub fn finish(&mut self) -> Validated {
        let mut ready = BytesMut::new();
        let violation = loop {
            let outcome = match self.read(&[]).0 {
                ReadRecordResult::Record => self.accept(&mut ready),
                ReadRecordResult::OutputFull => {
                    self.grow_fields();
                    Ok(())
                },
                ReadRecordResult::OutputEndsFull => {
                    self.grow_ends();
                    Ok(())
                },
                ReadRecordResult::InputEmpty | ReadRecordResult::End => break None,
            };
            if let Err(violation) = outcome {
                break Some(violation);
            }
        };

        // only skipped blank lines can be left over
        let violation = violation.or_else(|| {
            if self.carry.is_empty() {
                return None;
            }
            self.rows += 1;
            self.carry.clear();
            Some(StructuralViolation::FieldCount {
                row: self.rows,
                fields: 0,
            })
        });

        Validated {
            bytes: ready.freeze(),
            violation,
        }
    }

    fn read(&mut self, input: &[u8]) -> (ReadRecordResult, usize) {
        let (result, nin, nout, nend) = self.reader.read_record(
            input,
            &mut self.fields[self.fields_len..],
            &mut self.ends[self.ends_len..],
        );
        self.fields_len += nout;
        self.ends_len += nend;
        (result, nin)
    }

    fn grow_fields(&mut self) {
        let len = self.fields.len();
        self.fields.resize(len * 2, 0);
    }

    fn grow_ends(&mut self) {
        let len = self.ends.len();
        self.ends.resize(len * 2, 0);
    }

    fn check_length(&mut self) -> Result<(), StructuralViolation> {
        if self.carry.len() <= self.config.max_record_bytes {
            return Ok(());
        }
        self.carry.clear();
        Err(StructuralViolation::RecordTooLong {
            row: self.rows + 1,
            limit: self.config.max_record_bytes,
        })
    }

    /// Validate the record csv_core just completed, whose raw bytes are `carry`
    fn accept(&mut self, ready: &mut BytesMut) -> Result<(), StructuralViolation> {
        self.rows += 1;
        let fields = if is_blank(&self.carry) { 0 } else { self.ends_len };
        let first_end = self.ends[..self.ends_len].first().copied().unwrap_or(0);
        self.fields_len = 0;
        self.ends_len = 0;

        if fields == 0 || fields % FIELD_MULTIPLE != 0 {
            self.carry.clear();
            return Err(StructuralViolation::FieldCount {
                row: self.rows,
                fields,
            });
        }

        if self.rows == 1 && self.is_header(&self.fields[..first_end]) {
            debug!("Skipping header row");
            self.carry.clear();
            return Ok(());
        }

        ready.extend_from_slice(&self.carry.split());
        self.emitted += 1;

        if self.rows % self.config.progress_interval.max(1) == 0 {
            debug!(rows = self.rows, "Validated rows");
        }
        Ok(())
    }

    fn is_header(&self, first_field: &[u8]) -> bool {
        self.config
            .header_sentinel
            .as_deref()
            .is_some_and(|sentinel| first_field == sentinel.as_bytes())
    }
}

/// A record that is nothing but a line break, or that follows blank lines
/// csv_core skipped
fn is_blank(record: &[u8]) -> bool {
    if record.first() == Some(&b'\n') {
        return true;
    }
    let line = record.strip_suffix(b"\n").unwrap_or(record);
    line.strip_suffix(b"\r").unwrap_or(line).is_empty()
}

/// Run the validation stage over `upstream` on its own task
pub fn validate(upstream: ByteSource, config: ValidatorConfig) -> ByteSource {
    let (tx, output) = handoff();
    tokio::spawn(run(upstream, tx, RowValidator::new(config)).in_current_span());
    output
}

async fn run(mut upstream: ByteSource, tx: HandoffSender, mut validator: RowValidator) {
    let validated = loop {
        match pull(&mut upstream, &tx).await {
            Pull::Item(Ok(chunk)) => {
                let validated = validator.push(&chunk);
                if validated.violation.is_some() {
                    break validated;
                }
                if !tx.send(validated.bytes).await {
                    debug!(rows = validator.rows(), "Validator output closed");
                    return;
                }
            },
            Pull::Item(Err(err)) => {
                debug!(rows = validator.rows(), error = %err, "Finished reading file");
                tx.fail(err).await;
                return;
            },
            Pull::End => break validator.finish(),
            Pull::Closed => {
                debug!(rows = validator.rows(), "Validator output closed");
                return;
            },
        }
    };

    if !tx.send(validated.bytes).await {
        return;
    }
    match validated.violation {
        Some(violation) => {
            debug!(rows = validator.rows(), error = %violation, "Structural violation");
            tx.fail(violation.into()).await;
        },
        None => {
            debug!(
                rows = validator.rows(),
                emitted = validator.emitted_rows(),
                "Finished reading file"
            );
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{drain, source_from_bytes, PipelineError};

    fn rows(count: usize) -> String {
        (1..=count).map(|i| format!("{i},b{i},c{i}\n")).collect()
    }

    fn push_all(validator: &mut RowValidator, input: &[u8], chunk: usize) -> (Vec<u8>, Option<StructuralViolation>) {
        let mut out = Vec::new();
        for piece in input.chunks(chunk) {
            let validated = validator.push(piece);
            out.extend_from_slice(&validated.bytes);
            if validated.violation.is_some() {
                return (out, validated.violation);
            }
        }
        let validated = validator.finish();
        out.extend_from_slice(&validated.bytes);
        (out, validated.violation)
    }

    #[test]
    fn test_valid_input_is_byte_identical_for_any_chunking() {
        let input = "a,b,c,d,e,f\n\"quoted, comma\",\"multi\nline\",x\n\"esc \"\"q\"\"\",,\r\n1,2,3";
        for chunk in [1, 2, 3, 7, 64] {
            let mut validator = RowValidator::new(ValidatorConfig::default());
            let (out, violation) = push_all(&mut validator, input.as_bytes(), chunk);
            assert_eq!(out, input.as_bytes(), "chunk size {chunk}");
            assert!(violation.is_none());
            assert_eq!(validator.rows(), 4);
        }
    }

    #[test]
    fn test_violation_cites_row_and_emits_only_prior_rows() {
        let mut input = rows(36);
        input.push_str("1,2,3,4\n");
        input.push_str(&rows(5));

        let mut validator = RowValidator::new(ValidatorConfig::default());
        let (out, violation) = push_all(&mut validator, input.as_bytes(), 10);

        assert_eq!(out, rows(36).as_bytes());
        assert_eq!(
            violation,
            Some(StructuralViolation::FieldCount { row: 37, fields: 4 })
        );
    }

    #[test]
    fn test_blank_line_is_zero_field_violation() {
        let mut validator = RowValidator::new(ValidatorConfig::default());
        let (out, violation) = push_all(&mut validator, b"a,b,c\n\r\nd,e,f\n", 4);
        assert_eq!(out, b"a,b,c\n");
        assert_eq!(
            violation,
            Some(StructuralViolation::FieldCount { row: 2, fields: 0 })
        );
    }

    #[test]
    fn test_skipped_blank_line_is_still_a_violation() {
        for input in [&b"a,b,c\n\nd,e,f\n"[..], b"a,b,c\n\n"] {
            let mut validator = RowValidator::new(ValidatorConfig::default());
            let (out, violation) = push_all(&mut validator, input, 3);
            assert_eq!(out, b"a,b,c\n");
            assert_eq!(
                violation,
                Some(StructuralViolation::FieldCount { row: 2, fields: 0 })
            );
        }
    }

    #[test]
    fn test_open_quote_closes_at_end_of_input() {
        let mut validator = RowValidator::new(ValidatorConfig::default());
        let (out, violation) = push_all(&mut validator, b"a,b,c\n\"open,b,c\n", 5);
        assert_eq!(out, b"a,b,c\n");
        assert_eq!(
            violation,
            Some(StructuralViolation::FieldCount { row: 2, fields: 1 })
        );
    }

    #[test]
    fn test_stray_quotes_are_field_data() {
        let input = b"a,b\"c,d\n\"x\"y,2,3\n";
        let mut validator = RowValidator::new(ValidatorConfig::default());
        let (out, violation) = push_all(&mut validator, input, 4);
        assert_eq!(out, input);
        assert!(violation.is_none());
    }

    #[test]
    fn test_record_longer_than_limit_is_rejected() {
        let config = ValidatorConfig {
            max_record_bytes: 1024,
            ..ValidatorConfig::default()
        };
        let mut validator = RowValidator::new(config);

        let first = validator.push(b"a,b,c\n\"open,");
        assert_eq!(first.bytes, &b"a,b,c\n"[..]);
        assert!(first.violation.is_none());

        let filler = vec![b'x'; 512];
        let mut violation = None;
        for _ in 0..32 {
            let validated = validator.push(&filler);
            assert!(validated.bytes.is_empty());
            if validated.violation.is_some() {
                violation = validated.violation;
                break;
            }
        }

        assert_eq!(
            violation,
            Some(StructuralViolation::RecordTooLong { row: 2, limit: 1024 })
        );
        assert!(validator.carry.is_empty());
    }

    #[test]
    fn test_wide_records_grow_buffers() {
        let record = format!("{},{},{}\n", "x".repeat(5000), "y".repeat(5000), "z");
        let wide: String = (0..30).map(|i| format!("{i},")).collect::<String>() + "a,b,c\n";
        let input = format!("{record}{wide}");
        let mut validator = RowValidator::new(ValidatorConfig::default());
        let (out, violation) = push_all(&mut validator, input.as_bytes(), 700);
        assert_eq!(out, input.as_bytes());
        assert!(violation.is_none());
    }

    #[test]
    fn test_header_sentinel_skips_first_row_only() {
        let config = ValidatorConfig {
            header_sentinel: Some("Observation".to_string()),
            ..ValidatorConfig::default()
        };
        let mut validator = RowValidator::new(config);
        let input = b"Observation,x,y\n1,2,3\nObservation,4,5\n";
        let (out, violation) = push_all(&mut validator, input, 3);

        assert_eq!(out, b"1,2,3\nObservation,4,5\n");
        assert!(violation.is_none());
        assert_eq!(validator.rows(), 3);
        assert_eq!(validator.emitted_rows(), 2);
    }

    #[test]
    fn test_header_sentinel_still_validated() {
        let config = ValidatorConfig {
            header_sentinel: Some("Observation".to_string()),
            ..ValidatorConfig::default()
        };
        let mut validator = RowValidator::new(config);
        let (out, violation) = push_all(&mut validator, b"Observation,x\n1,2,3\n", 64);
        assert!(out.is_empty());
        assert_eq!(
            violation,
            Some(StructuralViolation::FieldCount { row: 1, fields: 2 })
        );
    }

    #[test]
    fn test_header_kept_without_sentinel() {
        let mut validator = RowValidator::new(ValidatorConfig::default());
        let (out, _) = push_all(&mut validator, b"Observation,x,y\n1,2,3\n", 64);
        assert_eq!(out, b"Observation,x,y\n1,2,3\n");
    }

    #[test]
    fn test_header_sentinel_matches_unquoted_value() {
        let config = ValidatorConfig {
            header_sentinel: Some("Obs \"1\"".to_string()),
            ..ValidatorConfig::default()
        };
        let mut validator = RowValidator::new(config);
        let (out, violation) = push_all(&mut validator, b"\"Obs \"\"1\"\"\",a,b\n1,2,3\n", 5);
        assert_eq!(out, b"1,2,3\n");
        assert!(violation.is_none());
    }

    #[tokio::test]
    async fn test_stage_forwards_violation_after_valid_bytes() {
        let input = format!("{}x,y\n{}", rows(2), rows(2));
        let output = validate(source_from_bytes(input, 4), ValidatorConfig::default());
        let (bytes, err) = drain(output).await;

        assert_eq!(bytes, rows(2).as_bytes());
        assert_eq!(
            err,
            Some(PipelineError::Structural(StructuralViolation::FieldCount {
                row: 3,
                fields: 2
            }))
        );
    }

    #[tokio::test]
    async fn test_stage_forwards_upstream_error_unchanged() {
        let upstream: ByteSource = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"a,b,c\n")),
            Err(PipelineError::Read("connection reset".into())),
        ]));
        let (bytes, err) = drain(validate(upstream, ValidatorConfig::default())).await;

        assert_eq!(bytes, b"a,b,c\n");
        assert_eq!(err, Some(PipelineError::Read("connection reset".into())));
    }

    #[tokio::test]
    async fn test_stage_clean_end() {
        let input = rows(100);
        let (bytes, err) = drain(validate(source_from_bytes(input.clone(), 17), ValidatorConfig::default())).await;
        assert_eq!(bytes, input.as_bytes());
        assert!(err.is_none());
    }
}
