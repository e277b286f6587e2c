// gas2influx-core - Pure transformation logic
//
// This crate turns one raw sensor CSV into a normalized, time-indexed batch
// and encodes that batch as the Parquet hand-off artifact. No ledger, no
// network, no async runtime.
//
// - Essence: CSV rows -> NormalizedBatch -> Parquet bytes
// - Accident: where files come from, where batches end up

pub mod error;
pub mod identifier;
pub mod parquet;
pub mod schema;
pub mod transform;
pub mod types;

pub use error::{ErrorCode, TransformError};
pub use identifier::{captured_date_from_identifier, FileRecord};
pub use schema::{MEASUREMENT_COLUMNS, MEASUREMENT_COUNT, TEMPERATURE_COLUMN, TIME_COLUMN};
pub use transform::{
    transform_file, transform_reader, MalformedReason, MalformedRow, RowErrorPolicy,
    TransformOptions, TransformOutput, TransformReport, DEFAULT_WINDOW_SECS,
};
pub use types::{format_timestamp, NormalizedBatch, NormalizedRow};
