//! Error codes shared across the pipeline and the transform error type.

use std::path::PathBuf;
use thiserror::Error;

use crate::transform::MalformedRow;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Ledger unreachable or timed out
    E001LedgerUnavailable,
    /// E002: File name carries no valid YYYYMMDD date
    E002MalformedIdentifier,
    /// E003: Row could not be coerced (row-scoped)
    E003MalformedRow,
    /// E004: Raw source file unreadable or missing required columns
    E004SourceUnreadable,
    /// E005: Time-series sink unreachable, rejected the write, or timed out
    E005SinkUnavailable,
    /// E006: Intermediate artifact read/write/delete failed
    E006ArtifactIo,
    /// E007: Transform exceeded its time limit
    E007TransformTimedOut,
    /// E008: Worker task died or the file state machine was misused
    E008Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001LedgerUnavailable => "E001",
            Self::E002MalformedIdentifier => "E002",
            Self::E003MalformedRow => "E003",
            Self::E004SourceUnreadable => "E004",
            Self::E005SinkUnavailable => "E005",
            Self::E006ArtifactIo => "E006",
            Self::E007TransformTimedOut => "E007",
            Self::E008Internal => "E008",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort the transformation of one file.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("[E002] Malformed identifier '{identifier}': {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    /// Only raised under `RowErrorPolicy::Fail`; `Skip` absorbs these.
    #[error("[E003] Malformed row in '{identifier}': {row}")]
    MalformedRow {
        identifier: String,
        row: MalformedRow,
    },

    #[error("[E004] Failed to read '{}': {source}", path.display())]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[E004] Failed to parse CSV header of '{identifier}': {source}")]
    Header {
        identifier: String,
        #[source]
        source: csv::Error,
    },

    #[error("[E004] '{identifier}' is missing required columns: {}", columns.join(", "))]
    MissingColumns {
        identifier: String,
        columns: Vec<String>,
    },
}

impl TransformError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedIdentifier { .. } => ErrorCode::E002MalformedIdentifier,
            Self::MalformedRow { .. } => ErrorCode::E003MalformedRow,
            Self::SourceIo { .. } | Self::Header { .. } | Self::MissingColumns { .. } => {
                ErrorCode::E004SourceUnreadable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_render() {
        let err = TransformError::MalformedIdentifier {
            identifier: "readings.csv".to_string(),
            reason: "no 8-digit date token".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::E002MalformedIdentifier);
        assert!(err.to_string().starts_with("[E002]"));

        let err = TransformError::MissingColumns {
            identifier: "20240302.csv".to_string(),
            columns: vec!["CO (ppm)".to_string(), "R3 (MOhm)".to_string()],
        };
        assert_eq!(err.code().as_str(), "E004");
        assert!(err.to_string().contains("CO (ppm), R3 (MOhm)"));
    }
}
