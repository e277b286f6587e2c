//! Admission ledger: the durable set of file identifiers that have already
//! been taken by a pipeline run.
//!
//! The ledger is injected into the controller as a trait object. Two
//! implementations ship here:
//! - [`SqliteLedger`] for real runs
//! - [`MemoryLedger`] for tests and dry runs

mod memory;
mod sqlite;

use async_trait::async_trait;
use gas2influx_core::ErrorCode;
use thiserror::Error;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// Outcome of an atomic check-then-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This call created the entry. At most one call per identifier ever sees this.
    Admitted,
    /// An entry already existed; nothing was written.
    AlreadyAdmitted,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("[E001] Ledger at '{location}' is unavailable: {reason}")]
    Unavailable { location: String, reason: String },
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::E001LedgerUnavailable
    }

    pub(crate) fn unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Key-existence store for processed file identifiers.
///
/// Entries are created once and never mutated or removed by the pipeline.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether `identifier` has an entry. Read-only.
    async fn is_admitted(&self, identifier: &str) -> Result<bool>;

    /// Record `identifier` unless it is already present, as one atomic step.
    async fn admit(&self, identifier: &str) -> Result<Admission>;
}
