//! Structured changelog tied to revisionable/revision pairs.
//!
//! Entries are buffered per transaction and flushed in the same unit as the
//! revision write: a changelog entry never exists without its revision, and
//! a rolled-back transaction drains the buffer.

use crate::types::{ChangeOp, ChangelogEntry, RevisionNumber, RevisionableId, Timestamp, UserId};
use parking_lot::Mutex;

/// Accepts flushed changelog batches.
pub trait ChangelogSink: Send + Sync {
    fn record(&self, entries: &[ChangelogEntry]);
}

/// Discards all entries.
#[derive(Debug, Default)]
pub struct NullChangelog;

impl ChangelogSink for NullChangelog {
    fn record(&self, _entries: &[ChangelogEntry]) {}
}

/// Retains flushed entries in memory, for tests and admin inspection.
#[derive(Debug, Default)]
pub struct MemoryChangelog {
    entries: Mutex<Vec<ChangelogEntry>>,
}

impl MemoryChangelog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ChangelogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ChangelogSink for MemoryChangelog {
    fn record(&self, entries: &[ChangelogEntry]) {
        self.entries.lock().extend_from_slice(entries);
    }
}

/// Transaction-scoped buffer of pending change operations.
///
/// The revision number is unknown while the transaction is open (the mint
/// decision happens at end-transaction), so the buffer holds bare ops and
/// stamps them when flushed.
#[derive(Debug, Default)]
pub(crate) struct ChangelogEmitter {
    pending: Vec<(ChangeOp, Timestamp)>,
}

impl ChangelogEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an operation for the active transaction.
    pub fn enqueue(&mut self, op: ChangeOp) {
        self.pending.push((op, Timestamp::now()));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Stamp buffered ops with the resolved revision and hand them to the sink.
    pub fn flush(
        &mut self,
        sink: &dyn ChangelogSink,
        revisionable: RevisionableId,
        revision: RevisionNumber,
        author: UserId,
    ) {
        if self.pending.is_empty() {
            return;
        }

        let entries: Vec<ChangelogEntry> = self
            .pending
            .drain(..)
            .map(|(op, timestamp)| ChangelogEntry {
                revisionable,
                revision,
                op,
                timestamp,
                author,
            })
            .collect();

        sink.record(&entries);
    }

    /// Discard buffered ops (rollback path).
    pub fn drain(&mut self) {
        self.pending.clear();
    }
}
