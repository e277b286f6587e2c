// Column layout of the raw sensor CSV and the Arrow schema of the artifact
//
// The raw header names are kept verbatim as measurement names all the way to
// the sink, so a field written to InfluxDB carries the unit in its key
// (e.g. `CO (ppm)`).

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Relative time column: seconds since the start of the capture.
pub const TIME_COLUMN: &str = "Time (s)";

/// The temperature-class column, tagged (indexed) by the reference sink schema.
pub const TEMPERATURE_COLUMN: &str = "Temperature (C)";

/// Number of numeric measurement columns every row must carry.
pub const MEASUREMENT_COUNT: usize = 19;

/// Measurement columns in artifact order.
pub const MEASUREMENT_COLUMNS: [&str; MEASUREMENT_COUNT] = [
    "CO (ppm)",
    "Humidity (%r.h.)",
    TEMPERATURE_COLUMN,
    "Flow rate (mL/min)",
    "Heater voltage (V)",
    "R1 (MOhm)",
    "R2 (MOhm)",
    "R3 (MOhm)",
    "R4 (MOhm)",
    "R5 (MOhm)",
    "R6 (MOhm)",
    "R7 (MOhm)",
    "R8 (MOhm)",
    "R9 (MOhm)",
    "R10 (MOhm)",
    "R11 (MOhm)",
    "R12 (MOhm)",
    "R13 (MOhm)",
    "R14 (MOhm)",
];

/// Timestamp column of the artifact (index of the normalized batch).
pub const ARTIFACT_TIME_FIELD: &str = "time";

/// Schema metadata keys embedded in every artifact.
pub const META_IDENTIFIER: &str = "gas2influx.identifier";
pub const META_CAPTURED_DATE: &str = "gas2influx.captured_date";
pub const META_SCHEMA_VERSION: &str = "gas2influx.schema_version";

const SCHEMA_VERSION: &str = "1.0.0";

/// Position of a measurement column, if the name is one of [`MEASUREMENT_COLUMNS`].
pub fn measurement_index(name: &str) -> Option<usize> {
    MEASUREMENT_COLUMNS.iter().position(|column| *column == name)
}

/// Returns a cached `Arc<Schema>` for the artifact, without per-file metadata.
pub fn artifact_schema_arc() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(|| Arc::new(Schema::new(artifact_fields()))))
}

/// Artifact schema carrying the source file identity as metadata, so a reader in
/// another process can rebuild the `FileRecord` without out-of-band state.
pub fn artifact_schema_for(identifier: &str, captured_date: &str) -> Arc<Schema> {
    let metadata = HashMap::from([
        (META_IDENTIFIER.to_string(), identifier.to_string()),
        (META_CAPTURED_DATE.to_string(), captured_date.to_string()),
        (META_SCHEMA_VERSION.to_string(), SCHEMA_VERSION.to_string()),
    ]);
    Arc::new(Schema::new_with_metadata(artifact_fields(), metadata))
}

fn artifact_fields() -> Vec<Field> {
    let mut fields = Vec::with_capacity(MEASUREMENT_COUNT + 1);
    fields.push(Field::new(
        ARTIFACT_TIME_FIELD,
        DataType::Timestamp(TimeUnit::Second, Some("UTC".into())),
        false,
    ));
    fields.extend(
        MEASUREMENT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    fields
}
