//! Error types for artifact storage and sinks

use gas2influx_core::parquet::CodecError;
use gas2influx_core::ErrorCode;
use thiserror::Error;

/// Failures touching the intermediate Parquet artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("[E006] Failed to initialize artifact store at '{location}': {source}")]
    Init {
        location: String,
        #[source]
        source: opendal::Error,
    },

    #[error("[E006] Artifact {op} failed for '{path}': {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: opendal::Error,
    },

    #[error("[E006] Artifact '{path}' could not be encoded or decoded: {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },
}

impl ArtifactError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::E006ArtifactIo
    }
}

/// Failures writing to or flushing a time-series sink.
///
/// A flush that returns any of these is inconclusive: the data may or may
/// not have landed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("[E005] Sink '{sink}' is unavailable: {reason}")]
    Unavailable { sink: &'static str, reason: String },

    #[error("[E005] Sink '{sink}' rejected the write (HTTP {status}): {body}")]
    Rejected {
        sink: &'static str,
        status: u16,
        body: String,
    },

    #[error("[E005] Batch does not fit measurement '{measurement}': {reason}")]
    Schema { measurement: String, reason: String },
}

impl SinkError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::E005SinkUnavailable
    }

    pub(crate) fn unavailable(sink: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            sink,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SinkError>;
