// Parquet artifact codec
//
// A NormalizedBatch is handed from the transform stage to the write stage as
// a Parquet file. The encoder splits rows into bounded Arrow chunks so memory
// per RecordBatch stays fixed regardless of file size.

mod reader;
mod writer;

use thiserror::Error;

pub use reader::{decode_artifact, rows_from_record_batch};
pub use writer::{encode_artifact, to_record_batches, writer_properties, ArtifactOptions};

/// Errors from encoding or decoding the Parquet artifact.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("artifact schema mismatch: {0}")]
    Schema(String),
}
