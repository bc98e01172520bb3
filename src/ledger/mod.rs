//! Attempt ledger: the ordered history of attempts in one run.
//!
//! [`AttemptLedger`] is the in-memory, append-only sequence the policy engine
//! reads. [`LedgerFile`] persists it as hash-chained JSONL.

mod jsonl;

pub use jsonl::{ChainReport, LedgerFile, LedgerHeader, LEDGER_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION};

use crate::domain::AttemptRecord;

/// Append-only attempt history. Insertion order is chronological order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptLedger {
    records: Vec<AttemptRecord>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Records are never reordered or removed.
    pub fn push(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    /// Read-only view handed to the policy engine.
    pub fn history(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// ID the next appended attempt must carry; `None` once IDs are exhausted.
    pub fn next_attempt_id(&self) -> Option<u32> {
        self.records.last().map_or(Some(1), |r| r.attempt_id.checked_add(1))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttemptRecord> {
        self.records.iter()
    }
}

impl From<Vec<AttemptRecord>> for AttemptLedger {
    fn from(records: Vec<AttemptRecord>) -> Self {
        Self { records }
    }
}

impl AsRef<[AttemptRecord]> for AttemptLedger {
    fn as_ref(&self) -> &[AttemptRecord] {
        &self.records
    }
}

impl<'a> IntoIterator for &'a AttemptLedger {
    type Item = &'a AttemptRecord;
    type IntoIter = std::slice::Iter<'a, AttemptRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
