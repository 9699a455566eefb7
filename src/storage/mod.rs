//! Revision storage backends.
//!
//! All backends satisfy one contract: rows keyed by revision number, a
//! scoped pretty-number allocator, a namespaced freeform key/value side
//! table, and snapshot-style storage transactions the entity layer can own
//! or defer to.

mod memory;
mod stub;
mod table;

pub use memory::{MemoryScope, MemoryStorage};
pub use stub::StubStorage;
pub use table::{RevisionTable, TableStorage};

use crate::error::Result;
use crate::types::{CustomData, NewRevision, RevisionData, RevisionNumber};
use serde_json::Value;

/// Prefix applied to freeform data keys so they can never collide with
/// standard revision columns.
pub(crate) const DATA_KEY_PREFIX: &str = "xdata:";

/// Backend contract for persisting and retrieving revision rows.
pub trait RevisionStorage: Send + Sync {
    /// Load a revision row.
    ///
    /// Fails with `RevisionLoadFailed` when absent and `UnknownAuthor` when
    /// the stored owner no longer resolves to a known user.
    fn load_revision(&self, number: RevisionNumber) -> Result<RevisionData>;

    fn count_revisions(&self) -> Result<usize>;

    /// Check existence. Backends may answer from a cache unless
    /// `force_live_check` is set.
    fn revision_exists(&self, number: RevisionNumber, force_live_check: bool) -> Result<bool>;

    /// Mint the next revision.
    ///
    /// The pretty number is `max(pretty among rows sharing this storage's
    /// context columns) + 1`, or 1 when the scope is empty. The read-then-
    /// allocate is serialized only within this process (behind the backend's
    /// write lock); concurrent writers in other processes race on the same
    /// scope, and serializing them is the caller's contract, not this
    /// layer's.
    fn next_revision(&self, input: NewRevision) -> Result<RevisionNumber>;

    /// Delete a row. Callers must guarantee it is the latest revision.
    fn remove_revision(&self, number: RevisionNumber) -> Result<()>;

    /// All revision numbers, ascending by date.
    fn revisions(&self) -> Result<Vec<RevisionNumber>>;

    /// Write a freeform key on a revision (namespaced internally).
    fn write_data_key(&self, number: RevisionNumber, key: &str, value: Value) -> Result<()>;

    /// Read a freeform key, if present.
    fn read_data_key(&self, number: RevisionNumber, key: &str) -> Result<Option<Value>>;

    /// List freeform keys on a revision (prefix stripped).
    fn data_keys(&self, number: RevisionNumber) -> Result<Vec<String>>;

    /// In-place update of a revision's custom columns (non-structural saves).
    fn write_revision_keys(&self, number: RevisionNumber, data: &CustomData) -> Result<()>;

    /// Whether this backend has a freeform side table at all.
    fn supports_data_keys(&self) -> bool {
        true
    }

    // --- Ambient storage transaction ---

    fn transaction_active(&self) -> bool;

    fn begin_transaction(&self) -> Result<()>;

    fn commit_transaction(&self) -> Result<()>;

    fn rollback_transaction(&self) -> Result<()>;
}

/// Helper shared by backends: order revision numbers ascending by date,
/// breaking ties by number.
pub(crate) fn sort_by_date(rows: &mut Vec<&RevisionData>) {
    rows.sort_by_key(|r| (r.timestamp, r.number));
}
