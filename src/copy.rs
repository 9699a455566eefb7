//! Revision copying across records of the same type.
//!
//! The standard revision metadata and custom columns copy generically;
//! everything type-specific runs through the ordered copy-part list the
//! type registered. Copied values are deep-cloned and never shared between
//! source and target.

use crate::error::{Result, RevisionError};
use crate::revisionable::Revisionable;
use crate::types::{NewRevision, RevisionNumber, Timestamp, UserId};
use serde_json::Value;
use tracing::{debug, warn};

/// Options for a revision copy.
#[derive(Clone, Debug)]
pub struct CopyOptions {
    pub owner: UserId,
    pub owner_name: String,
    pub comments: Option<String>,
    /// Carry this timestamp instead of the current time.
    pub date: Option<Timestamp>,
}

impl CopyOptions {
    pub fn new(owner: UserId, owner_name: impl Into<String>) -> Self {
        Self {
            owner,
            owner_name: owner_name.into(),
            comments: None,
            date: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_date(mut self, date: Timestamp) -> Self {
        self.date = Some(date);
        self
    }
}

/// Copies a revision's data to a target revision, possibly on a different
/// record instance of the same type.
#[derive(Debug, Default)]
pub struct CopyRevisionEngine;

impl CopyRevisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Copy `revision` of `source` onto `target`.
    ///
    /// Fails `RevisionableTypeMismatch` when the records are of different
    /// types. Returns the revision number minted on the target.
    pub fn copy_to(
        &self,
        source: &Revisionable,
        revision: RevisionNumber,
        target: &mut Revisionable,
        opts: &CopyOptions,
    ) -> Result<RevisionNumber> {
        if source.type_id() != target.type_id() {
            return Err(RevisionError::RevisionableTypeMismatch {
                expected: source.type_id().clone(),
                got: target.type_id().clone(),
            });
        }

        let row = source.load_revision(revision)?;
        let data_keys = Self::collect_data_keys(source, revision)?;
        self.apply(source.id(), revision, row, data_keys, target, opts)
    }

    /// Duplicate a revision onto the record itself.
    pub fn duplicate(
        &self,
        entity: &mut Revisionable,
        revision: RevisionNumber,
        opts: &CopyOptions,
    ) -> Result<RevisionNumber> {
        let row = entity.load_revision(revision)?;
        let data_keys = Self::collect_data_keys(entity, revision)?;
        let source_id = entity.id();
        self.apply(source_id, revision, row, data_keys, entity, opts)
    }

    fn collect_data_keys(
        source: &Revisionable,
        revision: RevisionNumber,
    ) -> Result<Vec<(String, Value)>> {
        if !source.storage().supports_data_keys() {
            return Ok(Vec::new());
        }
        let mut pairs = Vec::new();
        for key in source.storage().data_keys(revision)? {
            if let Some(value) = source.storage().read_data_key(revision, &key)? {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }

    fn apply(
        &self,
        source_id: crate::types::RevisionableId,
        source_revision: RevisionNumber,
        row: crate::types::RevisionData,
        data_keys: Vec<(String, Value)>,
        target: &mut Revisionable,
        opts: &CopyOptions,
    ) -> Result<RevisionNumber> {
        let previous = target.revision();

        // The whole copy is one storage unit of work; defer to an ambient
        // transaction when one is already active.
        let owns_storage_tx = !target.storage().transaction_active();
        if owns_storage_tx {
            target.storage().begin_transaction()?;
        }

        match self.apply_inner(source_id, source_revision, row, data_keys, target, opts) {
            Ok(number) => {
                if owns_storage_tx {
                    target.storage().commit_transaction()?;
                }
                debug!(
                    source = %source_id,
                    source_revision = %source_revision,
                    target = %target.id(),
                    minted = %number,
                    "copied revision"
                );
                Ok(number)
            }
            Err(e) => {
                if owns_storage_tx {
                    if let Err(rollback_err) = target.storage().rollback_transaction() {
                        warn!(target = %target.id(), error = %rollback_err, "storage rollback failed after copy error");
                    }
                }
                if let Err(cursor_err) = target.restore_cursor(previous) {
                    warn!(target = %target.id(), error = %cursor_err, "cursor restore failed after copy error");
                }
                Err(e)
            }
        }
    }

    fn apply_inner(
        &self,
        source_id: crate::types::RevisionableId,
        source_revision: RevisionNumber,
        row: crate::types::RevisionData,
        data_keys: Vec<(String, Value)>,
        target: &mut Revisionable,
        opts: &CopyOptions,
    ) -> Result<RevisionNumber> {
        // Standard metadata plus a deep clone of the custom map.
        let mut input = NewRevision::new(opts.owner, opts.owner_name.clone(), row.state.clone())
            .with_custom(row.custom.clone());
        input.comments = opts.comments.clone();
        input.timestamp = opts.date;

        let number = target.storage().next_revision(input)?;

        // Freeform keys, when the target backend has a side table.
        if target.storage().supports_data_keys() {
            for (key, value) in data_keys {
                target.storage().write_data_key(number, &key, value)?;
            }
        }

        target.restore_cursor(number)?;

        // Type-specific parts, in registration order. They run inside a
        // transaction on the target so they can use the normal setters;
        // their writes land in place on the copied revision.
        let parts = target.definition().copy_parts().to_vec();
        if !parts.is_empty() {
            target.start_transaction(opts.owner, opts.owner_name.clone(), None)?;
            for part in &parts {
                debug!(part = %part.name, target = %target.id(), "running copy part");
                if let Err(e) = part.op.apply(&row, target) {
                    target.rollback_transaction()?;
                    return Err(e);
                }
            }
            target.end_transaction()?;
        }

        // Provenance lands only once every part has succeeded, still inside
        // the copy's storage unit of work.
        target.record_copy_provenance(number, source_id, source_revision, opts.owner);

        Ok(number)
    }
}
