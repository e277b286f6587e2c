// Parquet bytes -> NormalizedBatch

use arrow::array::{Array, Float64Array, RecordBatch, TimestampSecondArray};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::CodecError;
use crate::identifier::FileRecord;
use crate::schema::{META_CAPTURED_DATE, META_IDENTIFIER, MEASUREMENT_COLUMNS, MEASUREMENT_COUNT};
use crate::types::{NormalizedBatch, NormalizedRow};

const READ_BATCH_ROWS: usize = 8 * 1024;

/// Decode a complete artifact, rebuilding the source `FileRecord` from the
/// schema metadata written by the encoder.
pub fn decode_artifact(bytes: Bytes) -> Result<NormalizedBatch, CodecError> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(bytes)?.with_batch_size(READ_BATCH_ROWS);
    let record = record_from_metadata(builder.schema().metadata())?;

    let num_rows = builder.metadata().file_metadata().num_rows().max(0) as usize;
    let mut rows = Vec::with_capacity(num_rows);
    for record_batch in builder.build()? {
        rows.extend(rows_from_record_batch(&record_batch?)?);
    }

    Ok(NormalizedBatch::new(record, rows))
}

/// Convert one artifact RecordBatch back into rows.
pub fn rows_from_record_batch(batch: &RecordBatch) -> Result<Vec<NormalizedRow>, CodecError> {
    let times = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampSecondArray>()
        .ok_or_else(|| CodecError::Schema("time column is not Timestamp(Second)".to_string()))?;

    let mut columns: Vec<&Float64Array> = Vec::with_capacity(MEASUREMENT_COUNT);
    for name in MEASUREMENT_COLUMNS {
        let column = batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
            .ok_or_else(|| CodecError::Schema(format!("missing Float64 column '{}'", name)))?;
        columns.push(column);
    }

    (0..batch.num_rows())
        .map(|i| {
            if times.is_null(i) {
                return Err(CodecError::Schema(format!("null timestamp at row {}", i)));
            }
            let timestamp = DateTime::from_timestamp(times.value(i), 0)
                .ok_or_else(|| CodecError::Schema(format!("timestamp out of range at row {}", i)))?;
            let mut values = [0.0f64; MEASUREMENT_COUNT];
            for (value, column) in values.iter_mut().zip(&columns) {
                *value = column.value(i);
            }
            Ok(NormalizedRow { timestamp, values })
        })
        .collect()
}

fn record_from_metadata(
    metadata: &std::collections::HashMap<String, String>,
) -> Result<FileRecord, CodecError> {
    let identifier = metadata
        .get(META_IDENTIFIER)
        .ok_or_else(|| CodecError::Schema(format!("missing '{}' metadata", META_IDENTIFIER)))?;
    let captured = metadata
        .get(META_CAPTURED_DATE)
        .ok_or_else(|| CodecError::Schema(format!("missing '{}' metadata", META_CAPTURED_DATE)))?;
    let captured_date = NaiveDate::parse_from_str(captured, "%Y-%m-%d")
        .map_err(|e| CodecError::Schema(format!("bad captured date '{}': {}", captured, e)))?;

    Ok(FileRecord {
        identifier: identifier.clone(),
        captured_date,
    })
}
