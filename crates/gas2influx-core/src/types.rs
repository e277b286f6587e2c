use chrono::{DateTime, Utc};

use crate::identifier::FileRecord;
use crate::schema::{measurement_index, MEASUREMENT_COLUMNS, MEASUREMENT_COUNT};

/// One normalized reading: an absolute UTC second plus every measurement as f64.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub timestamp: DateTime<Utc>,
    /// Values aligned with [`MEASUREMENT_COLUMNS`].
    pub values: [f64; MEASUREMENT_COUNT],
}

impl NormalizedRow {
    pub fn measurement(&self, name: &str) -> Option<f64> {
        measurement_index(name).map(|idx| self.values[idx])
    }

    /// `(column name, value)` pairs in schema order.
    pub fn measurements(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        MEASUREMENT_COLUMNS.iter().copied().zip(self.values.iter().copied())
    }

    /// Timestamp rendered as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn timestamp_iso(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// Ordered rows of one file, ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub record: FileRecord,
    pub rows: Vec<NormalizedRow>,
}

impl NormalizedBatch {
    pub fn new(record: FileRecord, rows: Vec<NormalizedRow>) -> Self {
        Self { record, rows }
    }

    pub fn empty(record: FileRecord) -> Self {
        Self::new(record, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.rows
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    /// First and last timestamps, if any rows are present.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.rows.first()?;
        let last = self.rows.last()?;
        Some((first.timestamp, last.timestamp))
    }
}

/// Format an instant at second resolution in the sink's index format.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
