// SQLite-backed ledger
//
// One connection per call keeps the ledger Send + Sync without a pool; WAL
// plus a busy timeout lets concurrent writers queue instead of failing.
//
// A call that outlives the ledger timeout is interrupted and then awaited, so
// the caller never sees an error for an admission that was committed. Writes
// run in an immediate transaction that rolls back once the deadline passes.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{Admission, Ledger, LedgerError, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS ingested_files (
    file_name TEXT PRIMARY KEY,
    admitted_at TEXT NOT NULL
);";

const ADMIT_SQL: &str = "INSERT INTO ingested_files (file_name, admitted_at) VALUES (?1, ?2)
     ON CONFLICT(file_name) DO NOTHING";

/// Failure inside one blocking ledger call.
#[derive(Debug)]
enum CallError {
    Sqlite(rusqlite::Error),
    /// The deadline passed before commit; the transaction was rolled back.
    Expired,
}

impl From<rusqlite::Error> for CallError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

type CallResult<T> = std::result::Result<T, CallError>;

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    path: PathBuf,
    timeout: Duration,
    busy_timeout: Duration,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger database and its table.
    ///
    /// `timeout` bounds every ledger call including this one; `busy_timeout`
    /// is SQLite's own wait for a competing writer's lock and should be the
    /// shorter of the two.
    pub async fn open(
        path: impl AsRef<Path>,
        timeout: Duration,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let ledger = Self {
            path: path.as_ref().to_path_buf(),
            timeout,
            busy_timeout,
        };

        ledger
            .run(|conn, _| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;",
                )?;
                let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
                if !mode.eq_ignore_ascii_case("wal") {
                    warn!(journal_mode = %mode, "Requested WAL mode for ledger but got another");
                }
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        debug!(path = %ledger.path.display(), "Ledger opened");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn timed_out(&self) -> LedgerError {
        LedgerError::unavailable(
            self.location(),
            format!("no response within {:?}", self.timeout),
        )
    }

    /// Run `op` on a fresh connection off the async executor, bounded by the
    /// ledger timeout. `op` receives the call's deadline.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, Instant) -> CallResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let deadline = Instant::now() + self.timeout;
        let (interrupt_tx, mut interrupt_rx) = oneshot::channel();

        let mut task = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(busy_timeout)?;
            let _ = interrupt_tx.send(conn.get_interrupt_handle());
            op(&conn, deadline)
        });

        let joined = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                if let Ok(handle) = interrupt_rx.try_recv() {
                    handle.interrupt();
                }
                // Report what the call actually did, not what the clock says
                let late = task.await;
                if matches!(late, Ok(Ok(_))) {
                    warn!(
                        path = %self.path.display(),
                        timeout = ?self.timeout,
                        "Ledger call completed after its timeout"
                    );
                }
                late
            }
        };

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(CallError::Expired)) => Err(self.timed_out()),
            Ok(Err(CallError::Sqlite(rusqlite::Error::SqliteFailure(e, _))))
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Err(self.timed_out())
            }
            Ok(Err(CallError::Sqlite(e))) => Err(LedgerError::unavailable(self.location(), e)),
            Err(join) => Err(LedgerError::unavailable(self.location(), join)),
        }
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn is_admitted(&self, identifier: &str) -> Result<bool> {
        let key = identifier.to_string();
        let found = self
            .run(move |conn, _| {
                let row = conn
                    .query_row(
                        "SELECT 1 FROM ingested_files WHERE file_name = ?1",
                        params![key],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(found.is_some())
    }

    async fn admit(&self, identifier: &str) -> Result<Admission> {
        let key = identifier.to_string();
        let admitted_at = chrono::Utc::now().to_rfc3339();
        let changed = self
            .run(move |conn, deadline| {
                let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
                let changed = tx.execute(ADMIT_SQL, params![key, admitted_at])?;
                if Instant::now() >= deadline {
                    // Dropping the transaction rolls it back
                    return Err(CallError::Expired);
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;

        let admission = if changed == 1 {
            Admission::Admitted
        } else {
            Admission::AlreadyAdmitted
        };
        debug!(file = %identifier, ?admission, "Ledger admission");
        Ok(admission)
    }
}
