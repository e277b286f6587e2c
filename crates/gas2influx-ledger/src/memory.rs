use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Admission, Ledger, LedgerError, Result};

/// In-process ledger. Forgets everything on drop.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate entries, as if earlier runs had admitted them.
    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().map(Into::into).collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `LedgerError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.lock().contains(identifier)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::unavailable("memory", "marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn is_admitted(&self, identifier: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.contains(identifier))
    }

    async fn admit(&self, identifier: &str) -> Result<Admission> {
        self.check_available()?;
        if self.entries.lock().insert(identifier.to_string()) {
            Ok(Admission::Admitted)
        } else {
            Ok(Admission::AlreadyAdmitted)
        }
    }
}
