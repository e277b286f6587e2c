// Per-file pipeline state machine
//
// Discovered -> Checking -> Admitted -> Transforming -> Writing -> Done
//                        -> AlreadyAdmitted -> Skipped
//
// At-least-once delivery inserts Committing between Writing and Done (the
// ledger admit happens after the flush). Any non-terminal state may fail;
// only Discovered may be cancelled.

use gas2influx_ledger::Admission;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Checking,
    /// Cleared for processing. Under at-least-once delivery this means the
    /// pre-check found no entry; the entry itself is written at commit.
    Admitted,
    AlreadyAdmitted,
    Transforming,
    Writing,
    Committing,
    Done,
    Skipped,
    Failed,
    Cancelled,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Skipped | Self::Failed | Self::Cancelled
        )
    }

    /// Apply `step`, or report that it is not allowed from this state.
    pub fn next(self, step: Step) -> Result<FileState, IllegalTransition> {
        use FileState::*;

        let next = match (self, step) {
            (Discovered, Step::Check) => Checking,
            (Discovered, Step::Cancel) => Cancelled,
            (Checking, Step::Admission(Admission::Admitted)) => Admitted,
            (Checking, Step::Admission(Admission::AlreadyAdmitted)) => AlreadyAdmitted,
            (AlreadyAdmitted, Step::Skip) => Skipped,
            (Admitted, Step::Transform) => Transforming,
            (Transforming, Step::Write) => Writing,
            (Writing, Step::Commit) => Committing,
            (Writing, Step::Finish) | (Committing, Step::Finish) => Done,
            (state, Step::Fail) if !state.is_terminal() => Failed,
            (from, step) => return Err(IllegalTransition { from, step }),
        };
        Ok(next)
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::Checking => "checking",
            Self::Admitted => "admitted",
            Self::AlreadyAdmitted => "already_admitted",
            Self::Transforming => "transforming",
            Self::Writing => "writing",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Check,
    /// The ledger's answer for this file.
    Admission(Admission),
    Skip,
    Transform,
    Write,
    Commit,
    Finish,
    Fail,
    Cancel,
}

#[derive(Debug, Clone, Copy, Error)]
#[error("illegal transition from {from} on {step:?}")]
pub struct IllegalTransition {
    pub from: FileState,
    pub step: Step,
}

/// One file's walk through the state machine.
#[derive(Debug, Clone)]
pub struct FileRun {
    identifier: String,
    state: FileState,
    history: Vec<FileState>,
}

impl FileRun {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            state: FileState::Discovered,
            history: vec![FileState::Discovered],
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Every state visited, starting with `Discovered`.
    pub fn history(&self) -> &[FileState] {
        &self.history
    }

    pub fn apply(&mut self, step: Step) -> Result<FileState, IllegalTransition> {
        let next = self.state.next(step)?;
        debug!(file = %self.identifier, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.history.push(next);
        Ok(next)
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = FileState::Failed;
            self.history.push(FileState::Failed);
        }
    }
}
