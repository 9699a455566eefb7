//! The revisionable entity.
//!
//! A `Revisionable` is identity plus a cursor into its append-only revision
//! history. All mutation flows through transactions: setters mark parts
//! dirty, and the end-transaction decision either mints a new revision
//! (structural change or state transition) or rewrites the current
//! revision's custom columns in place.

use crate::changelog::{ChangelogSink, NullChangelog};
use crate::error::{Result, RevisionError};
use crate::events::{EngineEvent, EventBus, NullEventBus};
use crate::graph::{StateChangeContext, StateRef, TypeDefinition, TypeRegistry};
use crate::revisionable::TransactionController;
use crate::storage::{RevisionStorage, StubStorage};
use crate::types::{
    ChangeOp, ChangelogEntry, CustomData, NewRevision, RevisionData, RevisionNumber,
    RevisionableId, Timestamp, Transaction, TransactionOutcome, TypeId, UserId,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// External collaborators the entity reports into.
#[derive(Clone)]
pub struct Collaborators {
    pub changelog: Arc<dyn ChangelogSink>,
    pub events: Arc<dyn EventBus>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            changelog: Arc::new(NullChangelog),
            events: Arc::new(NullEventBus),
        }
    }
}

/// A record whose history is tracked as a sequence of immutable revisions.
pub struct Revisionable {
    id: RevisionableId,
    definition: Arc<TypeDefinition>,
    storage: Box<dyn RevisionStorage>,
    collaborators: Collaborators,

    /// Latest committed revision.
    current_revision: RevisionNumber,

    /// In-memory read cursor (follows `current_revision` after commits).
    selected_revision: RevisionNumber,

    /// Cached row for the selected revision.
    selected: RevisionData,

    /// Cached row for the current revision.
    current: RevisionData,

    revision_lock: bool,

    tx: Option<TransactionController>,

    last_transaction: Option<Transaction>,
}

impl Revisionable {
    /// Create a new revisionable with its initial revision (number 1, the
    /// type's initial state).
    pub fn create(
        id: RevisionableId,
        registry: &TypeRegistry,
        type_id: &TypeId,
        storage: Box<dyn RevisionStorage>,
        collaborators: Collaborators,
        owner: UserId,
        owner_name: impl Into<String>,
    ) -> Result<Self> {
        if id.is_stub() {
            return Err(RevisionError::StorageContractViolation(
                "cannot create a real revisionable under the stub identity".into(),
            ));
        }

        let definition = registry.definition(type_id)?;
        let initial = definition.initial_state()?;
        let initial_name = definition.graph().name(initial).to_string();

        let number = storage.next_revision(NewRevision::new(owner, owner_name, initial_name))?;
        let row = storage.load_revision(number)?;

        debug!(revisionable = %id, revision = %number, state = %row.state, "created revisionable");

        Ok(Self {
            id,
            definition,
            storage,
            collaborators,
            current_revision: number,
            selected_revision: number,
            selected: row.clone(),
            current: row,
            revision_lock: false,
            tx: None,
            last_transaction: None,
        })
    }

    /// Attach to existing storage, selecting the latest revision.
    pub fn open(
        id: RevisionableId,
        registry: &TypeRegistry,
        type_id: &TypeId,
        storage: Box<dyn RevisionStorage>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let definition = registry.definition(type_id)?;

        let revisions = storage.revisions()?;
        let latest = *revisions.last().ok_or(RevisionError::NoCurrentRevision)?;
        let row = storage.load_revision(latest)?;

        Ok(Self {
            id,
            definition,
            storage,
            collaborators,
            current_revision: latest,
            selected_revision: latest,
            selected: row.clone(),
            current: row,
            revision_lock: false,
            tx: None,
            last_transaction: None,
        })
    }

    /// Build the frozen stub instance for a type: one synthetic revision in
    /// the initial state, every mutation rejected.
    pub fn stub(registry: &TypeRegistry, type_id: &TypeId) -> Result<Self> {
        let definition = registry.definition(type_id)?;
        let initial = definition.initial_state()?;
        let initial_name = definition.graph().name(initial).to_string();

        let storage = StubStorage::new(initial_name);
        let row = storage.load_revision(RevisionNumber(1))?;

        Ok(Self {
            id: RevisionableId::STUB,
            definition,
            storage: Box::new(storage),
            collaborators: Collaborators::default(),
            current_revision: RevisionNumber(1),
            selected_revision: RevisionNumber(1),
            selected: row.clone(),
            current: row,
            revision_lock: false,
            tx: None,
            last_transaction: None,
        })
    }

    // --- Identity & read surface ---

    pub fn id(&self) -> RevisionableId {
        self.id
    }

    pub fn type_id(&self) -> &TypeId {
        self.definition.type_id()
    }

    pub fn is_stub(&self) -> bool {
        self.id.is_stub()
    }

    /// The selected revision number (the read cursor).
    pub fn revision(&self) -> RevisionNumber {
        self.selected_revision
    }

    pub fn selected_revision(&self) -> RevisionNumber {
        self.selected_revision
    }

    /// The most recent revision by date.
    pub fn latest_revision(&self) -> Result<RevisionNumber> {
        self.storage
            .revisions()?
            .last()
            .copied()
            .ok_or(RevisionError::NoCurrentRevision)
    }

    /// State name of the current revision.
    pub fn state_name(&self) -> &str {
        &self.current.state
    }

    /// All states of this type's graph.
    pub fn states(&self) -> Vec<String> {
        self.definition
            .graph()
            .states()
            .map(|(_, s)| s.name.clone())
            .collect()
    }

    /// Whether the current state accepts edits.
    pub fn is_editable(&self) -> bool {
        match self.definition.graph().by_name(&self.current.state) {
            Ok(s) => self.definition.graph().state(s).changes_allowed,
            Err(_) => false,
        }
    }

    pub fn count_revisions(&self) -> Result<usize> {
        self.storage.count_revisions()
    }

    pub fn revision_exists(&self, number: RevisionNumber, force: bool) -> Result<bool> {
        self.storage.revision_exists(number, force)
    }

    /// Revision numbers ascending by date.
    pub fn revisions(&self) -> Result<Vec<RevisionNumber>> {
        self.storage.revisions()
    }

    pub fn load_revision(&self, number: RevisionNumber) -> Result<RevisionData> {
        self.storage.load_revision(number)
    }

    /// Row backing the selected revision.
    pub fn selected_data(&self) -> &RevisionData {
        &self.selected
    }

    /// Custom column value on the selected revision.
    pub fn custom_value(&self, key: &str) -> Option<&Value> {
        self.selected.custom.get(key)
    }

    // --- Revision cursor ---

    /// Switch the read cursor to a revision. No-op while locked.
    pub fn select_revision(&mut self, number: RevisionNumber) -> Result<()> {
        if self.revision_lock {
            return Ok(());
        }
        if !self.storage.revision_exists(number, false)? {
            return Err(RevisionError::RevisionDoesNotExist(number));
        }
        self.selected = self.storage.load_revision(number)?;
        self.selected_revision = number;
        Ok(())
    }

    /// Suppress `select_revision` during dependent read-only operations.
    pub fn lock_revision(&mut self) {
        self.revision_lock = true;
    }

    pub fn unlock_revision(&mut self) {
        self.revision_lock = false;
    }

    pub fn is_revision_locked(&self) -> bool {
        self.revision_lock
    }

    // --- Transactions ---

    /// Open a unit of work.
    pub fn start_transaction(
        &mut self,
        owner: UserId,
        owner_name: impl Into<String>,
        comments: Option<String>,
    ) -> Result<()> {
        if self.is_stub() {
            return Err(RevisionError::OperationNotAllowedOnStub("start_transaction"));
        }
        if self.tx.is_some() {
            return Err(RevisionError::TransactionAlreadyOpen);
        }

        // Cooperate with an ambient storage transaction: open one only if
        // none is active, and then own its commit/rollback.
        let owns_storage_tx = !self.storage.transaction_active();
        if owns_storage_tx {
            self.storage.begin_transaction()?;
        }

        debug!(revisionable = %self.id, source = %self.current_revision, owns_storage_tx, "transaction started");

        self.tx = Some(TransactionController::new(
            owner,
            owner_name.into(),
            comments,
            self.current_revision,
            owns_storage_tx,
        ));
        Ok(())
    }

    pub fn transaction_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Mark the open transaction as simulated: it runs to completion but is
    /// rolled back at end-transaction.
    pub fn simulate(&mut self, simulated: bool) -> Result<()> {
        let tx = self.tx.as_mut().ok_or(RevisionError::NoTransactionOpen)?;
        tx.simulated = simulated;
        Ok(())
    }

    /// Mark a logical part dirty. A structural part flags the whole
    /// transaction as structural exactly once.
    pub fn set_part_changed(&mut self, part: impl Into<String>, structural: bool) -> Result<()> {
        let part = part.into();
        let tx = self.tx.as_mut().ok_or(RevisionError::NoTransactionOpen)?;
        tx.dirty_parts.insert(part.clone());

        if structural && !tx.structural {
            tx.structural = true;
            tx.emitter
                .enqueue(ChangeOp::StructureChanged { part: part.clone() });
            tx.events.push(EngineEvent::StructureChanged {
                revisionable: self.id,
                part,
            });
        }
        Ok(())
    }

    /// Buffer a custom-column write (non-structural).
    pub fn set_custom_key(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        let tx = self.tx.as_mut().ok_or(RevisionError::NoTransactionOpen)?;
        tx.emitter.enqueue(ChangeOp::SetKey {
            key: key.clone(),
            value: value.clone(),
        });
        tx.pending_custom.insert(key.clone(), value);
        tx.dirty_parts.insert(key);
        Ok(())
    }

    /// Request a state transition inside the open transaction.
    ///
    /// Returns false when the record is already in the requested state.
    pub fn set_state(&mut self, name: &str) -> Result<bool> {
        if self.is_stub() {
            return Err(RevisionError::OperationNotAllowedOnStub("set_state"));
        }
        if self.tx.is_none() {
            return Err(RevisionError::NoTransactionOpen);
        }

        let graph = Arc::clone(self.definition.graph());
        let target = graph.by_name(name)?;

        if self.current.state == name {
            return Ok(false);
        }

        let from = if self.current.state.is_empty() {
            None
        } else {
            Some(graph.by_name(&self.current.state)?)
        };

        if let Some(from_ref) = from {
            if !graph.has_dependency(from_ref, target) {
                return Err(RevisionError::InvalidStateChange {
                    from: Some(self.current.state.clone()),
                    to: name.to_string(),
                });
            }
        }

        self.run_validator(target)?;

        let from_name = from.map(|s| graph.name(s).to_string());
        let Some(tx) = self.tx.as_mut() else {
            return Err(RevisionError::NoTransactionOpen);
        };
        tx.structural = true;
        tx.state_change = Some((from_name.clone(), name.to_string()));
        tx.emitter.enqueue(ChangeOp::SetState {
            from: from_name.clone(),
            to: name.to_string(),
        });
        tx.events.push(EngineEvent::StateChanged {
            revisionable: self.id,
            from: from_name,
            to: name.to_string(),
        });

        Ok(true)
    }

    fn run_validator(&self, target: StateRef) -> Result<()> {
        let graph = self.definition.graph();
        let target_name = graph.name(target);
        if let Some(validator) = self.definition.validator(target_name) {
            // Validators see the custom data as it would be after commit.
            let mut custom = self.current.custom.clone();
            if let Some(tx) = &self.tx {
                for (k, v) in &tx.pending_custom {
                    custom.insert(k.clone(), v.clone());
                }
            }
            let ctx = StateChangeContext {
                revisionable: self.id,
                from: if self.current.state.is_empty() {
                    None
                } else {
                    Some(&self.current.state)
                },
                to: target_name,
                custom: &custom,
            };
            validator(&ctx)?;
        }
        Ok(())
    }

    /// Convenience: open a transaction if none is open, set the state, close
    /// it. Returns whether the state actually changed.
    pub fn make_state(
        &mut self,
        name: &str,
        owner: UserId,
        owner_name: impl Into<String>,
        comments: Option<String>,
    ) -> Result<bool> {
        if self.is_stub() {
            return Err(RevisionError::OperationNotAllowedOnStub("make_state"));
        }

        let opened = self.tx.is_none();
        if opened {
            self.start_transaction(owner, owner_name, comments)?;
        }

        let changed = match self.set_state(name) {
            Ok(changed) => changed,
            Err(e) => {
                if opened {
                    self.rollback_transaction()?;
                }
                return Err(e);
            }
        };

        if opened {
            self.end_transaction()?;
        }
        Ok(changed)
    }

    /// Close the unit of work.
    ///
    /// Mints a new revision iff the transaction saw a state change or a
    /// structural part change; otherwise the current revision's custom
    /// columns are updated in place.
    pub fn end_transaction(&mut self) -> Result<Transaction> {
        let tx = self.tx.take().ok_or(RevisionError::NoTransactionOpen)?;

        match self.finish_transaction(tx) {
            Ok(result) => {
                self.collaborators.events.emit(EngineEvent::TransactionEnded {
                    revisionable: self.id,
                    outcome: result.outcome,
                    revision: self.current_revision,
                });
                self.last_transaction = Some(result.clone());
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    fn finish_transaction(&mut self, mut tx: TransactionController) -> Result<Transaction> {
        let mint = tx.requires_mint();
        let simulated = tx.simulated;
        let source_revision = tx.source_revision;

        let attempt = if mint {
            self.mint_revision(&mut tx)
        } else if simulated {
            // In-place writes would be undone at rollback anyway; skip them
            // so an ambient storage transaction never sees them either.
            Ok(None)
        } else {
            self.write_in_place(&mut tx)
        };

        match attempt {
            Ok(target_revision) => {
                if simulated {
                    // Simulation: undo everything, including a minted row.
                    if tx.owns_storage_tx {
                        self.storage.rollback_transaction()?;
                    } else if let Some(number) = target_revision {
                        // Deferring to an ambient storage transaction whose
                        // commit is out of our hands: compensate by removing
                        // the simulated mint directly.
                        self.storage.remove_revision(number)?;
                    }
                    tx.emitter.drain();
                    self.current_revision = source_revision;
                    self.selected_revision = source_revision;
                    self.reload_current()?;
                    debug!(revisionable = %self.id, "transaction rolled back (simulated)");
                    return Ok(Transaction {
                        source_revision,
                        target_revision: None,
                        outcome: TransactionOutcome::RolledBack,
                        simulated: true,
                    });
                }

                // Changelog entries flush in the same unit as the revision
                // write: still inside the owned storage transaction.
                let resolved = target_revision.unwrap_or(self.current_revision);
                tx.emitter.flush(
                    self.collaborators.changelog.as_ref(),
                    self.id,
                    resolved,
                    tx.owner,
                );

                if tx.owns_storage_tx {
                    self.storage.commit_transaction()?;
                }

                // Buffered events fire only now that the work is committed.
                for event in tx.events.drain(..) {
                    self.collaborators.events.emit(event);
                }

                let outcome = if target_revision.is_some() {
                    TransactionOutcome::Changed
                } else {
                    TransactionOutcome::Unchanged
                };
                debug!(revisionable = %self.id, ?outcome, revision = %self.current_revision, "transaction ended");

                Ok(Transaction {
                    source_revision,
                    target_revision,
                    outcome,
                    simulated: false,
                })
            }
            Err(e) => {
                // Failed transactions leave the revisionable as if rolled
                // back; no partial revision is observable. Secondary failures
                // must not mask the original error, so they are only logged.
                if tx.owns_storage_tx {
                    if let Err(rollback_err) = self.storage.rollback_transaction() {
                        warn!(revisionable = %self.id, error = %rollback_err, "storage rollback failed after transaction error");
                    }
                }
                tx.emitter.drain();
                self.current_revision = source_revision;
                self.selected_revision = source_revision;
                if let Err(reload_err) = self.reload_current() {
                    warn!(revisionable = %self.id, error = %reload_err, "cursor reload failed after transaction error");
                }
                Err(e)
            }
        }
    }

    /// Mint path: returns the new revision number.
    fn mint_revision(&mut self, tx: &mut TransactionController) -> Result<Option<RevisionNumber>> {
        let graph = Arc::clone(self.definition.graph());

        // Automatic transition: only on structural change with no explicit
        // state change in the same transaction.
        let state = match &tx.state_change {
            Some((_, to)) => to.clone(),
            None => {
                let current_ref = graph.by_name(&self.current.state)?;
                match graph.structural_change_target(current_ref) {
                    Some(auto) => {
                        let to = graph.name(auto).to_string();
                        let from = Some(self.current.state.clone());
                        tx.emitter.enqueue(ChangeOp::SetState {
                            from: from.clone(),
                            to: to.clone(),
                        });
                        tx.events.push(EngineEvent::StateChanged {
                            revisionable: self.id,
                            from,
                            to: to.clone(),
                        });
                        to
                    }
                    None => self.current.state.clone(),
                }
            }
        };

        let mut custom = self.current.custom.clone();
        for (k, v) in &tx.pending_custom {
            custom.insert(k.clone(), v.clone());
        }

        let input = NewRevision {
            owner: tx.owner,
            owner_name: tx.owner_name.clone(),
            comments: tx.comments.clone(),
            state,
            custom,
            timestamp: None,
        };

        let number = self.storage.next_revision(input)?;
        self.current_revision = number;
        self.selected_revision = number;
        self.reload_current()?;
        Ok(Some(number))
    }

    /// Non-mint path: overwrite custom columns on the current revision.
    fn write_in_place(&mut self, tx: &mut TransactionController) -> Result<Option<RevisionNumber>> {
        if !tx.pending_custom.is_empty() {
            self.storage
                .write_revision_keys(self.current_revision, &tx.pending_custom)?;
            self.reload_current()?;
        }
        Ok(None)
    }

    /// Discard the open unit of work entirely.
    pub fn rollback_transaction(&mut self) -> Result<Transaction> {
        let mut tx = self.tx.take().ok_or(RevisionError::NoTransactionOpen)?;

        if tx.owns_storage_tx {
            self.storage.rollback_transaction()?;
        }
        tx.emitter.drain();
        self.reload_current()?;

        debug!(revisionable = %self.id, "transaction rolled back");

        let result = Transaction {
            source_revision: tx.source_revision,
            target_revision: None,
            outcome: TransactionOutcome::RolledBack,
            simulated: tx.simulated,
        };
        self.last_transaction = Some(result.clone());
        Ok(result)
    }

    /// Result of the most recently completed transaction.
    pub fn last_transaction(&self) -> Result<&Transaction> {
        self.last_transaction
            .as_ref()
            .ok_or(RevisionError::LastTransactionNotAvailable)
    }

    // --- Undo ---

    /// Remove the most recent revision and restore the previous one as
    /// current. Requires at least two revisions.
    pub fn undo_revision(&mut self) -> Result<()> {
        if self.is_stub() {
            return Err(RevisionError::OperationNotAllowedOnStub("undo_revision"));
        }
        if self.tx.is_some() {
            return Err(RevisionError::TransactionAlreadyOpen);
        }

        // Two most recent by date descending.
        let revisions = self.storage.revisions()?;
        if revisions.len() < 2 {
            return Err(RevisionError::CannotUndoRevision {
                available: revisions.len(),
            });
        }
        let newest = revisions[revisions.len() - 1];
        let previous = revisions[revisions.len() - 2];

        self.storage.remove_revision(newest)?;
        self.current_revision = previous;
        self.selected_revision = previous;
        self.reload_current()?;

        debug!(revisionable = %self.id, removed = %newest, restored = %previous, "undid revision");
        Ok(())
    }

    // --- Timed transitions ---

    /// Target state of a due timed transition, if any.
    pub fn due_timed_change(&self, now: Timestamp) -> Option<String> {
        let graph = self.definition.graph();
        let current = graph.by_name(&self.current.state).ok()?;
        let (target, delay) = graph.timed_change(current)?;
        if self.current.timestamp.plus(delay) <= now {
            Some(graph.name(target).to_string())
        } else {
            None
        }
    }

    /// Apply a due timed transition via `make_state`. Returns whether a
    /// transition happened.
    pub fn apply_timed_change(
        &mut self,
        now: Timestamp,
        owner: UserId,
        owner_name: impl Into<String>,
    ) -> Result<bool> {
        match self.due_timed_change(now) {
            Some(target) => self.make_state(&target, owner, owner_name, None),
            None => Ok(false),
        }
    }

    /// Direct access to the backend, for freeform data keys and
    /// storage-level inspection.
    pub fn storage(&self) -> &dyn RevisionStorage {
        self.storage.as_ref()
    }

    // --- Crate-internal hooks (copy engine) ---

    pub(crate) fn definition(&self) -> &Arc<TypeDefinition> {
        &self.definition
    }

    /// Record copy provenance in the changelog. Called only after every copy
    /// part succeeded, so an entry never outlives a rolled-back copy.
    pub(crate) fn record_copy_provenance(
        &mut self,
        number: RevisionNumber,
        source_revisionable: RevisionableId,
        source_revision: RevisionNumber,
        author: UserId,
    ) {
        self.collaborators.changelog.record(&[ChangelogEntry {
            revisionable: self.id,
            revision: number,
            op: ChangeOp::RevisionCopied {
                source_revisionable,
                source_revision,
            },
            timestamp: Timestamp::now(),
            author,
        }]);
    }

    /// Move both cursors to a revision (copy engine adoption and error paths).
    pub(crate) fn restore_cursor(&mut self, number: RevisionNumber) -> Result<()> {
        self.current_revision = number;
        self.selected_revision = number;
        self.reload_current()
    }

    /// Refresh both cached rows from storage.
    fn reload_current(&mut self) -> Result<()> {
        self.current = self.storage.load_revision(self.current_revision)?;
        if self.selected_revision == self.current_revision {
            self.selected = self.current.clone();
        } else {
            self.selected = self.storage.load_revision(self.selected_revision)?;
        }
        Ok(())
    }
}
