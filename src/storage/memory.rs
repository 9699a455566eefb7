//! In-memory revision storage for ephemeral and testing use.

use crate::error::{Result, RevisionError};
use crate::storage::{sort_by_date, RevisionStorage, DATA_KEY_PREFIX};
use crate::types::{
    CustomData, NewRevision, PrettyNumber, RevisionData, RevisionNumber, RevisionableId, Timestamp,
};
use crate::users::UserProvider;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared pretty-number scope.
///
/// Several revisionables that share context columns (e.g. the same parent or
/// campaign) register their rows here so pretty numbers increment across the
/// whole scope, not per record.
#[derive(Debug, Default)]
pub struct MemoryScope {
    rows: RwLock<Vec<ScopeRow>>,
}

#[derive(Clone, Debug)]
struct ScopeRow {
    context: CustomData,
    revisionable: RevisionableId,
    revision: RevisionNumber,
    pretty: PrettyNumber,
}

impl MemoryScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn max_pretty(&self, context: &CustomData) -> Option<PrettyNumber> {
        self.rows
            .read()
            .iter()
            .filter(|r| &r.context == context)
            .map(|r| r.pretty)
            .max()
    }

    fn register(
        &self,
        context: &CustomData,
        revisionable: RevisionableId,
        revision: RevisionNumber,
        pretty: PrettyNumber,
    ) {
        self.rows.write().push(ScopeRow {
            context: context.clone(),
            revisionable,
            revision,
            pretty,
        });
    }

    fn unregister(&self, revisionable: RevisionableId, revision: RevisionNumber) {
        self.rows
            .write()
            .retain(|r| !(r.revisionable == revisionable && r.revision == revision));
    }

    fn snapshot(&self) -> Vec<ScopeRow> {
        self.rows.read().clone()
    }

    fn restore(&self, rows: Vec<ScopeRow>) {
        *self.rows.write() = rows;
    }
}

struct MemoryInner {
    rows: BTreeMap<RevisionNumber, RevisionData>,
    data_keys: BTreeMap<(RevisionNumber, String), Value>,
    /// Next revision number. Monotonic; never rewound, even after removal.
    next_number: u64,
    snapshot: Option<TxSnapshot>,
}

struct TxSnapshot {
    rows: BTreeMap<RevisionNumber, RevisionData>,
    data_keys: BTreeMap<(RevisionNumber, String), Value>,
    next_number: u64,
    scope_rows: Vec<ScopeRow>,
}

/// Ephemeral backend. Values are deep-cloned on every read, so callers can
/// never alias stored data.
pub struct MemoryStorage {
    revisionable: RevisionableId,
    users: Arc<dyn UserProvider>,
    context: CustomData,
    scope: Arc<MemoryScope>,
    inner: RwLock<MemoryInner>,
}

impl MemoryStorage {
    pub fn new(revisionable: RevisionableId, users: Arc<dyn UserProvider>) -> Self {
        Self::with_scope(revisionable, users, CustomData::new(), MemoryScope::new())
    }

    /// Backend whose pretty numbers are scoped by `context` within the
    /// shared `scope`.
    pub fn with_scope(
        revisionable: RevisionableId,
        users: Arc<dyn UserProvider>,
        context: CustomData,
        scope: Arc<MemoryScope>,
    ) -> Self {
        Self {
            revisionable,
            users,
            context,
            scope,
            inner: RwLock::new(MemoryInner {
                rows: BTreeMap::new(),
                data_keys: BTreeMap::new(),
                next_number: 1,
                snapshot: None,
            }),
        }
    }

    pub fn revisionable(&self) -> RevisionableId {
        self.revisionable
    }
}

impl RevisionStorage for MemoryStorage {
    fn load_revision(&self, number: RevisionNumber) -> Result<RevisionData> {
        let inner = self.inner.read();
        let row = inner
            .rows
            .get(&number)
            .ok_or_else(|| RevisionError::RevisionLoadFailed {
                number,
                reason: "row not found".into(),
            })?;

        if !self.users.exists(row.owner) {
            return Err(RevisionError::UnknownAuthor(row.owner));
        }

        Ok(row.clone())
    }

    fn count_revisions(&self) -> Result<usize> {
        Ok(self.inner.read().rows.len())
    }

    fn revision_exists(&self, number: RevisionNumber, _force_live_check: bool) -> Result<bool> {
        Ok(self.inner.read().rows.contains_key(&number))
    }

    fn next_revision(&self, input: NewRevision) -> Result<RevisionNumber> {
        let mut inner = self.inner.write();

        let number = RevisionNumber(inner.next_number);
        inner.next_number += 1;

        let pretty = self
            .scope
            .max_pretty(&self.context)
            .map(PrettyNumber::next)
            .unwrap_or(PrettyNumber(1));

        let row = RevisionData {
            number,
            pretty,
            owner: input.owner,
            owner_name: input.owner_name,
            timestamp: input.timestamp.unwrap_or_else(Timestamp::now),
            comments: input.comments,
            state: input.state,
            custom: input.custom,
        };

        tracing::debug!(revisionable = %self.revisionable, revision = %number, pretty = %pretty, "minting revision");

        inner.rows.insert(number, row);
        self.scope
            .register(&self.context, self.revisionable, number, pretty);

        Ok(number)
    }

    fn remove_revision(&self, number: RevisionNumber) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.rows.remove(&number).is_none() {
            return Err(RevisionError::RevisionDoesNotExist(number));
        }
        inner.data_keys.retain(|(n, _), _| *n != number);
        self.scope.unregister(self.revisionable, number);
        Ok(())
    }

    fn revisions(&self) -> Result<Vec<RevisionNumber>> {
        let inner = self.inner.read();
        let mut rows: Vec<&RevisionData> = inner.rows.values().collect();
        sort_by_date(&mut rows);
        Ok(rows.into_iter().map(|r| r.number).collect())
    }

    fn write_data_key(&self, number: RevisionNumber, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.rows.contains_key(&number) {
            return Err(RevisionError::RevisionDoesNotExist(number));
        }
        inner
            .data_keys
            .insert((number, format!("{DATA_KEY_PREFIX}{key}")), value);
        Ok(())
    }

    fn read_data_key(&self, number: RevisionNumber, key: &str) -> Result<Option<Value>> {
        let inner = self.inner.read();
        Ok(inner
            .data_keys
            .get(&(number, format!("{DATA_KEY_PREFIX}{key}")))
            .cloned())
    }

    fn data_keys(&self, number: RevisionNumber) -> Result<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .data_keys
            .keys()
            .filter(|(n, _)| *n == number)
            .map(|(_, k)| k.trim_start_matches(DATA_KEY_PREFIX).to_string())
            .collect())
    }

    fn write_revision_keys(&self, number: RevisionNumber, data: &CustomData) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .rows
            .get_mut(&number)
            .ok_or(RevisionError::RevisionDoesNotExist(number))?;
        for (key, value) in data {
            row.custom.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn transaction_active(&self) -> bool {
        self.inner.read().snapshot.is_some()
    }

    fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.snapshot.is_some() {
            return Err(RevisionError::StorageContractViolation(
                "storage transaction already active".into(),
            ));
        }
        inner.snapshot = Some(TxSnapshot {
            rows: inner.rows.clone(),
            data_keys: inner.data_keys.clone(),
            next_number: inner.next_number,
            scope_rows: self.scope.snapshot(),
        });
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .snapshot
            .take()
            .ok_or_else(|| {
                RevisionError::StorageContractViolation("no storage transaction to commit".into())
            })
            .map(|_| ())
    }

    fn rollback_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let snapshot = inner.snapshot.take().ok_or_else(|| {
            RevisionError::StorageContractViolation("no storage transaction to roll back".into())
        })?;

        // Revision numbers are never reused: the counter keeps its
        // high-water mark even though the rows are rewound.
        inner.rows = snapshot.rows;
        inner.data_keys = snapshot.data_keys;
        inner.next_number = inner.next_number.max(snapshot.next_number);
        self.scope.restore(snapshot.scope_rows);
        Ok(())
    }
}
