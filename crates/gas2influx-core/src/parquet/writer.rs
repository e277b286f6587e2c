// NormalizedBatch -> Arrow RecordBatches -> Parquet bytes

use arrow::array::{ArrayRef, Float64Array, RecordBatch, TimestampSecondArray};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use std::sync::Arc;

use super::CodecError;
use crate::schema::{artifact_schema_for, MEASUREMENT_COUNT};
use crate::types::NormalizedBatch;

const DEFAULT_ROW_GROUP_SIZE: usize = 32 * 1024;
const DEFAULT_CHUNK_ROWS: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactOptions {
    /// Rows per Arrow RecordBatch while encoding.
    pub chunk_rows: usize,
    pub row_group_size: usize,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            chunk_rows: DEFAULT_CHUNK_ROWS,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }
}

/// Writer properties for the artifact: Snappy, dictionary off (float columns
/// rarely repeat), page statistics for the time column.
pub fn writer_properties(row_group_size: usize) -> WriterProperties {
    WriterProperties::builder()
        .set_dictionary_enabled(false)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_compression(Compression::SNAPPY)
        .set_data_page_size_limit(256 * 1024)
        .set_max_row_group_size(row_group_size.max(1))
        .build()
}

/// Split a batch into Arrow RecordBatches of at most `chunk_rows` rows.
///
/// An empty batch yields no RecordBatches.
pub fn to_record_batches(
    batch: &NormalizedBatch,
    chunk_rows: usize,
) -> Result<Vec<RecordBatch>, CodecError> {
    let schema = artifact_schema_for(
        &batch.record.identifier,
        &batch.record.captured_date.to_string(),
    );

    batch
        .rows
        .chunks(chunk_rows.max(1))
        .map(|chunk| {
            let times: Vec<i64> = chunk.iter().map(|row| row.timestamp.timestamp()).collect();
            let mut columns: Vec<ArrayRef> = Vec::with_capacity(MEASUREMENT_COUNT + 1);
            columns.push(Arc::new(TimestampSecondArray::from(times).with_timezone("UTC")));
            for idx in 0..MEASUREMENT_COUNT {
                let values: Vec<f64> = chunk.iter().map(|row| row.values[idx]).collect();
                columns.push(Arc::new(Float64Array::from(values)));
            }
            RecordBatch::try_new(Arc::clone(&schema), columns).map_err(CodecError::from)
        })
        .collect()
}

/// Encode a batch as a complete Parquet file.
///
/// Empty batches still produce a valid file (schema and metadata, zero rows),
/// so the write stage can treat "nothing retained" like any other artifact.
pub fn encode_artifact(
    batch: &NormalizedBatch,
    options: &ArtifactOptions,
) -> Result<Vec<u8>, CodecError> {
    let schema = artifact_schema_for(
        &batch.record.identifier,
        &batch.record.captured_date.to_string(),
    );
    let mut buffer = Vec::new();
    let props = writer_properties(options.row_group_size);
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;

    for record_batch in to_record_batches(batch, options.chunk_rows)? {
        writer.write(&record_batch)?;
    }
    writer.close()?;

    Ok(buffer)
}
