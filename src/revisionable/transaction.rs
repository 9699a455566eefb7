//! Transaction-scoped bookkeeping.
//!
//! A controller exists only while a unit of work is open. It tracks which
//! parts were touched, whether any of them was structural, the pending state
//! change, and buffered custom-column writes. The mint decision itself is
//! made by the entity at end-transaction.

use crate::changelog::ChangelogEmitter;
use crate::events::EngineEvent;
use crate::types::{CustomData, RevisionNumber, UserId};
use std::collections::BTreeSet;

#[derive(Debug)]
pub(crate) struct TransactionController {
    pub owner: UserId,
    pub owner_name: String,
    pub comments: Option<String>,

    /// Revision that was current when the transaction opened.
    pub source_revision: RevisionNumber,

    /// Set once by the first structural part change.
    pub structural: bool,

    /// Logical parts touched during the transaction.
    pub dirty_parts: BTreeSet<String>,

    /// Explicit state change: (from, to). At most one per transaction;
    /// later calls overwrite the target.
    pub state_change: Option<(Option<String>, String)>,

    /// Buffered custom-column writes, applied at end-transaction.
    pub pending_custom: CustomData,

    /// Simulated transactions are unconditionally rolled back at the end.
    pub simulated: bool,

    /// Whether this transaction opened the storage transaction (and so owns
    /// commit/rollback). False when an ambient one was already active.
    pub owns_storage_tx: bool,

    pub emitter: ChangelogEmitter,

    /// Events buffered until the transaction resolves; delivered only when
    /// it commits, dropped on rollback or simulation.
    pub events: Vec<EngineEvent>,
}

impl TransactionController {
    pub fn new(
        owner: UserId,
        owner_name: String,
        comments: Option<String>,
        source_revision: RevisionNumber,
        owns_storage_tx: bool,
    ) -> Self {
        Self {
            owner,
            owner_name,
            comments,
            source_revision,
            structural: false,
            dirty_parts: BTreeSet::new(),
            state_change: None,
            pending_custom: CustomData::new(),
            simulated: false,
            owns_storage_tx,
            emitter: ChangelogEmitter::new(),
            events: Vec::new(),
        }
    }

    /// Whether end-transaction must mint a new revision.
    pub fn requires_mint(&self) -> bool {
        self.structural || self.state_change.is_some()
    }
}
