// Raw sensor CSV -> NormalizedBatch
//
// Rows are streamed through a single reused `StringRecord`; only rows that
// survive the window filter and type coercion are kept. Relative offsets are
// anchored at midnight UTC of the captured date and truncated to whole
// seconds.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use csv::StringRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::TransformError;
use crate::identifier::FileRecord;
use crate::schema::{MEASUREMENT_COLUMNS, MEASUREMENT_COUNT, TIME_COLUMN};
use crate::types::{NormalizedBatch, NormalizedRow};

/// Only the first 24 hours of relative time are retained.
pub const DEFAULT_WINDOW_SECS: u64 = 86_400;

const MAX_MALFORMED_SAMPLES: usize = 16;

/// What to do with a row that fails coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowErrorPolicy {
    /// Drop the row, keep going.
    #[default]
    Skip,
    /// Abort the whole file on the first malformed row.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Inclusive upper bound on `Time (s)`.
    pub window_secs: u64,
    pub row_errors: RowErrorPolicy,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            row_errors: RowErrorPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedReason {
    #[error("unreadable record: {0}")]
    Unreadable(String),
    #[error("missing value for '{0}'")]
    MissingColumn(&'static str),
    #[error("'{column}' value '{value}' is not a finite number")]
    NotNumeric { column: &'static str, value: String },
    #[error("'Time (s)' value '{0}' is not a valid offset")]
    InvalidOffset(String),
}

/// A row dropped from the batch, with its 1-based line in the source file.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {reason}")]
pub struct MalformedRow {
    pub line: u64,
    pub reason: MalformedReason,
}

/// Counters describing what happened to the rows of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub rows_read: u64,
    pub rows_retained: usize,
    pub rows_outside_window: u64,
    pub malformed_rows: u64,
    /// The first few malformed rows, for logging.
    pub malformed_samples: Vec<MalformedRow>,
    /// True when source rows were not time-ordered and had to be sorted.
    pub reordered: bool,
}

impl TransformReport {
    fn record_malformed(&mut self, row: MalformedRow) {
        self.malformed_rows += 1;
        if self.malformed_samples.len() < MAX_MALFORMED_SAMPLES {
            self.malformed_samples.push(row);
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub batch: NormalizedBatch,
    pub report: TransformReport,
}

/// Transform the CSV at `path`; the identifier is the file name.
pub fn transform_file(
    path: &Path,
    options: &TransformOptions,
) -> Result<TransformOutput, TransformError> {
    let record = FileRecord::from_path(path)?;
    let file = File::open(path).map_err(|source| TransformError::SourceIo {
        path: path.to_path_buf(),
        source,
    })?;
    transform_reader(record, file, options)
}

/// Transform CSV content read from `reader` into the normalized batch for `record`.
pub fn transform_reader<R: Read>(
    record: FileRecord,
    reader: R,
    options: &TransformOptions,
) -> Result<TransformOutput, TransformError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|source| TransformError::Header {
            identifier: record.identifier.clone(),
            source,
        })?
        .clone();
    let layout = ColumnLayout::resolve(&headers, &record.identifier)?;

    let base = midnight_utc(&record);
    let mut report = TransformReport::default();
    let mut rows: Vec<NormalizedRow> = Vec::new();
    let mut in_order = true;
    let mut raw = StringRecord::new();

    loop {
        let line = match csv_reader.read_record(&mut raw) {
            Ok(true) => raw.position().map(|p| p.line()).unwrap_or_default(),
            Ok(false) => break,
            Err(e) if e.is_io_error() => {
                return Err(TransformError::SourceIo {
                    path: record.identifier.clone().into(),
                    source: std::io::Error::other(e.to_string()),
                });
            }
            Err(e) => {
                report.rows_read += 1;
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                let malformed = MalformedRow {
                    line,
                    reason: MalformedReason::Unreadable(e.to_string()),
                };
                reject(&record, &mut report, malformed, options.row_errors)?;
                continue;
            }
        };
        report.rows_read += 1;

        match layout.parse_row(&raw, base, options.window_secs) {
            Ok(Some(row)) => {
                if let Some(last) = rows.last() {
                    in_order &= last.timestamp <= row.timestamp;
                }
                rows.push(row);
            }
            Ok(None) => report.rows_outside_window += 1,
            Err(reason) => {
                let malformed = MalformedRow { line, reason };
                reject(&record, &mut report, malformed, options.row_errors)?;
            }
        }
    }

    if !in_order {
        // Stable: rows sharing a second keep their source order.
        rows.sort_by_key(|row| row.timestamp);
        report.reordered = true;
    }
    report.rows_retained = rows.len();

    if report.malformed_rows > 0 {
        warn!(
            file = %record.identifier,
            malformed = report.malformed_rows,
            first = %report.malformed_samples[0],
            "Dropped malformed rows"
        );
    }
    debug!(
        file = %record.identifier,
        rows_read = report.rows_read,
        retained = report.rows_retained,
        outside_window = report.rows_outside_window,
        reordered = report.reordered,
        "Transformed file"
    );

    Ok(TransformOutput {
        batch: NormalizedBatch::new(record, rows),
        report,
    })
}

fn reject(
    record: &FileRecord,
    report: &mut TransformReport,
    row: MalformedRow,
    policy: RowErrorPolicy,
) -> Result<(), TransformError> {
    match policy {
        RowErrorPolicy::Skip => {
            debug!(file = %record.identifier, %row, "Skipping malformed row");
            report.record_malformed(row);
            Ok(())
        }
        RowErrorPolicy::Fail => Err(TransformError::MalformedRow {
            identifier: record.identifier.clone(),
            row,
        }),
    }
}

fn midnight_utc(record: &FileRecord) -> DateTime<Utc> {
    record.captured_date.and_time(NaiveTime::MIN).and_utc()
}

/// Header positions of the required columns.
struct ColumnLayout {
    time: usize,
    measurements: [usize; MEASUREMENT_COUNT],
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord, identifier: &str) -> Result<Self, TransformError> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim_start_matches('\u{feff}') == name)
        };

        let mut missing = Vec::new();
        let time = position(TIME_COLUMN);
        if time.is_none() {
            missing.push(TIME_COLUMN.to_string());
        }

        let mut measurements = [0usize; MEASUREMENT_COUNT];
        for (slot, name) in measurements.iter_mut().zip(MEASUREMENT_COLUMNS) {
            match position(name) {
                Some(idx) => *slot = idx,
                None => missing.push(name.to_string()),
            }
        }

        match time {
            Some(time) if missing.is_empty() => Ok(Self { time, measurements }),
            _ => Err(TransformError::MissingColumns {
                identifier: identifier.to_string(),
                columns: missing,
            }),
        }
    }

    /// `Ok(None)` means the row is well-formed but outside the window.
    fn parse_row(
        &self,
        raw: &StringRecord,
        base: DateTime<Utc>,
        window_secs: u64,
    ) -> Result<Option<NormalizedRow>, MalformedReason> {
        let time_raw = field(raw, self.time, TIME_COLUMN)?;
        let offset: f64 = time_raw
            .parse()
            .map_err(|_| MalformedReason::InvalidOffset(time_raw.to_string()))?;
        if !offset.is_finite() || offset < 0.0 {
            return Err(MalformedReason::InvalidOffset(time_raw.to_string()));
        }
        if offset > window_secs as f64 {
            return Ok(None);
        }

        let mut values = [0.0f64; MEASUREMENT_COUNT];
        for ((value, &idx), column) in values
            .iter_mut()
            .zip(self.measurements.iter())
            .zip(MEASUREMENT_COLUMNS)
        {
            let text = field(raw, idx, column)?;
            *value = text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MalformedReason::NotNumeric {
                    column,
                    value: text.to_string(),
                })?;
        }

        let timestamp = TimeDelta::try_seconds(offset.trunc() as i64)
            .and_then(|delta| base.checked_add_signed(delta))
            .ok_or_else(|| MalformedReason::InvalidOffset(time_raw.to_string()))?;

        Ok(Some(NormalizedRow { timestamp, values }))
    }
}

fn field<'r>(
    raw: &'r StringRecord,
    idx: usize,
    column: &'static str,
) -> Result<&'r str, MalformedReason> {
    match raw.get(idx) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(MalformedReason::MissingColumn(column)),
    }
}
