//! File-scoped failure taxonomy
//!
//! Every variant aborts one file's pipeline and nothing else.

use gas2influx_core::{ErrorCode, TransformError};
use gas2influx_ledger::LedgerError;
use gas2influx_writer::{ArtifactError, SinkError};
use std::time::Duration;
use thiserror::Error;

use crate::state::IllegalTransition;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    LedgerUnavailable(#[from] LedgerError),

    /// Malformed identifier, unreadable source, or a malformed row under the
    /// `fail` policy.
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("[E007] Transform of '{identifier}' did not finish within {timeout:?}")]
    TransformTimedOut {
        identifier: String,
        timeout: Duration,
    },

    #[error(transparent)]
    SinkUnavailable(#[from] SinkError),

    #[error(transparent)]
    ArtifactIo(#[from] ArtifactError),

    #[error("[E008] {0}")]
    Internal(String),
}

impl IngestError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LedgerUnavailable(e) => e.code(),
            Self::Transform(e) => e.code(),
            Self::TransformTimedOut { .. } => ErrorCode::E007TransformTimedOut,
            Self::SinkUnavailable(e) => e.code(),
            Self::ArtifactIo(e) => e.code(),
            Self::Internal(_) => ErrorCode::E008Internal,
        }
    }
}

impl From<IllegalTransition> for IngestError {
    fn from(err: IllegalTransition) -> Self {
        Self::Internal(err.to_string())
    }
}
