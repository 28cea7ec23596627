use std::sync::RwLock;

use crate::core::{StatusReport, StoredReport};
use crate::error::StoreError;

mod jsonl;

pub use jsonl::JsonlStore;

/// Append-only report log.
///
/// Implementations must make each `append` atomic and visible to every
/// `snapshot` started after it returns. A snapshot is a prefix of the log:
/// it never exposes a later report while hiding an earlier one.
pub trait ReportStore: Send + Sync {
    /// Appends one report and returns the sequence number assigned to it.
    fn append(&self, report: StatusReport) -> Result<u64, StoreError>;

    /// Everything appended so far.
    fn snapshot(&self) -> Result<Vec<StoredReport>, StoreError>;

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.snapshot()?.len())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-process store. The write lock is held only for a single push.
#[derive(Debug, Default)]
pub struct MemoryStore {
    reports: RwLock<Vec<StoredReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for MemoryStore {
    fn append(&self, report: StatusReport) -> Result<u64, StoreError> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| StoreError::unavailable("memory", "lock poisoned"))?;
        let seq = reports.len() as u64;
        reports.push(StoredReport { seq, report });
        Ok(seq)
    }

    fn snapshot(&self) -> Result<Vec<StoredReport>, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::unavailable("memory", "lock poisoned"))?;
        Ok(reports.clone())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::unavailable("memory", "lock poisoned"))?;
        Ok(reports.len())
    }
}
