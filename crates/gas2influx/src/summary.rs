use serde::Serialize;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::state::FileState;

/// Terminal result for one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub identifier: String,
    pub state: FileState,
    /// Points confirmed by the sink flush.
    pub rows_written: usize,
    /// Rows dropped by coercion under the `skip` policy.
    pub malformed_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn new(identifier: impl Into<String>, state: FileState) -> Self {
        Self {
            identifier: identifier.into(),
            state,
            rows_written: 0,
            malformed_rows: 0,
            error_code: None,
            error: None,
        }
    }

    pub fn cancelled(identifier: impl Into<String>) -> Self {
        Self::new(identifier, FileState::Cancelled)
    }

    pub fn failed(identifier: impl Into<String>, error: &IngestError) -> Self {
        Self {
            error_code: Some(error.code().as_str()),
            error: Some(error.to_string()),
            ..Self::new(identifier, FileState::Failed)
        }
    }
}

/// Aggregate of one run over a discovered file set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub rows_written: usize,
    /// In discovery order.
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: Vec<FileOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in &outcomes {
            match outcome.state {
                FileState::Done => summary.done += 1,
                FileState::Skipped => summary.skipped += 1,
                FileState::Cancelled => summary.cancelled += 1,
                _ => summary.failed += 1,
            }
            summary.rows_written += outcome.rows_written;
        }
        summary.outcomes = outcomes;
        summary
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn outcome(&self, identifier: &str) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| o.identifier == identifier)
    }

    /// Emit one line per failed file plus a totals line.
    pub fn log(&self) {
        for outcome in self.outcomes.iter().filter(|o| o.state == FileState::Failed) {
            warn!(
                file = %outcome.identifier,
                code = outcome.error_code.unwrap_or("-"),
                error = outcome.error.as_deref().unwrap_or(""),
                "File failed"
            );
        }
        info!(
            files = self.total(),
            done = self.done,
            skipped = self.skipped,
            failed = self.failed,
            cancelled = self.cancelled,
            rows_written = self.rows_written,
            "Run complete"
        );
    }
}
