//! Table-backed revision storage.
//!
//! One [`RevisionTable`] holds the rows of every revisionable persisted to a
//! single table file; a [`TableStorage`] handle binds a revisionable ID and
//! its context columns to that table. The file carries magic bytes and a
//! format version, is serialized with MessagePack, and is guarded by an
//! exclusive fs2 lock so only one process owns it.

use crate::error::{Result, RevisionError};
use crate::storage::{sort_by_date, RevisionStorage, DATA_KEY_PREFIX};
use crate::types::{
    CustomData, NewRevision, PrettyNumber, RevisionData, RevisionNumber, RevisionableId, Timestamp,
};
use crate::users::UserProvider;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Magic bytes for the revision table file.
const TABLE_MAGIC: &[u8; 4] = b"RVT\0";

/// Current table format version.
const TABLE_VERSION: u8 = 1;

/// Capacity of the per-handle existence cache.
const EXISTS_CACHE_SIZE: usize = 256;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TableInner {
    /// Revision rows keyed by (revisionable, revision).
    rows: BTreeMap<RevisionableId, BTreeMap<RevisionNumber, RevisionData>>,

    /// Freeform side table, keys namespaced with the data-key prefix.
    data_keys: BTreeMap<RevisionableId, BTreeMap<(RevisionNumber, String), Value>>,

    /// Next revision number per revisionable. Monotonic, never rewound.
    counters: HashMap<RevisionableId, u64>,

    /// Context columns per revisionable, used to scope pretty numbers.
    contexts: HashMap<RevisionableId, CustomData>,
}

/// Shared on-disk revision table.
pub struct RevisionTable {
    path: PathBuf,

    /// Exclusive lock held for the table's lifetime.
    _lock_file: File,

    inner: RwLock<TableInner>,

    /// Snapshot taken at begin-transaction; present while one is active.
    snapshot: Mutex<Option<TableInner>>,
}

impl RevisionTable {
    /// Open an existing table file or create a new one.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let lock_file = Self::acquire_lock(&path)?;

        let inner = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            TableInner::default()
        };

        let table = Arc::new(Self {
            path,
            _lock_file: lock_file,
            inner: RwLock::new(inner),
            snapshot: Mutex::new(None),
        });

        table.save()?;
        Ok(table)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("lock");
        let lock_file = File::create(lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| RevisionError::Locked)?;
        Ok(lock_file)
    }

    fn load_from_file(path: &Path) -> Result<TableInner> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != TABLE_MAGIC {
            return Err(RevisionError::InvalidFormat("invalid table magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != TABLE_VERSION {
            return Err(RevisionError::InvalidFormat(format!(
                "unsupported table version: {}",
                version[0]
            )));
        }

        let mut encoded = Vec::new();
        file.read_to_end(&mut encoded)?;
        Ok(rmp_serde::from_slice(&encoded)?)
    }

    /// Persist the table to its file.
    pub fn save(&self) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(TABLE_MAGIC)?;
        file.write_all(&[TABLE_VERSION])?;

        let inner = self.inner.read();
        let encoded = rmp_serde::to_vec(&*inner)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    /// Persist unless an ambient transaction will do it at commit.
    fn save_unless_in_transaction(&self) -> Result<()> {
        if self.snapshot.lock().is_none() {
            self.save()?;
        }
        Ok(())
    }

    fn register_context(&self, revisionable: RevisionableId, context: CustomData) {
        self.inner
            .write()
            .contexts
            .insert(revisionable, context);
    }

    /// Total rows across all revisionables (admin surface).
    pub fn row_count(&self) -> usize {
        self.inner.read().rows.values().map(|m| m.len()).sum()
    }

    fn transaction_active(&self) -> bool {
        self.snapshot.lock().is_some()
    }

    fn begin_transaction(&self) -> Result<()> {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_some() {
            return Err(RevisionError::StorageContractViolation(
                "storage transaction already active".into(),
            ));
        }
        *snapshot = Some(self.inner.read().clone());
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        let mut snapshot = self.snapshot.lock();
        if snapshot.take().is_none() {
            return Err(RevisionError::StorageContractViolation(
                "no storage transaction to commit".into(),
            ));
        }
        drop(snapshot);
        self.save()
    }

    fn rollback_transaction(&self) -> Result<()> {
        let mut snapshot_slot = self.snapshot.lock();
        let snapshot = snapshot_slot.take().ok_or_else(|| {
            RevisionError::StorageContractViolation("no storage transaction to roll back".into())
        })?;

        let mut inner = self.inner.write();
        // Counters keep their high-water marks so rolled-back numbers are
        // burnt, never reused.
        let mut counters = snapshot.counters.clone();
        for (id, n) in &inner.counters {
            counters
                .entry(*id)
                .and_modify(|c| *c = (*c).max(*n))
                .or_insert(*n);
        }
        *inner = snapshot;
        inner.counters = counters;
        drop(inner);
        drop(snapshot_slot);
        // Persist so the burnt numbers survive a reopen.
        self.save()
    }
}

/// Storage handle binding one revisionable to a shared [`RevisionTable`].
pub struct TableStorage {
    table: Arc<RevisionTable>,
    revisionable: RevisionableId,
    users: Arc<dyn UserProvider>,
    exists_cache: Mutex<LruCache<RevisionNumber, bool>>,
}

impl TableStorage {
    /// Attach a revisionable to the table, fixing its context columns.
    pub fn attach(
        table: Arc<RevisionTable>,
        revisionable: RevisionableId,
        context: CustomData,
        users: Arc<dyn UserProvider>,
    ) -> Self {
        table.register_context(revisionable, context);
        Self {
            table,
            revisionable,
            users,
            exists_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(EXISTS_CACHE_SIZE).expect("nonzero cache size"),
            )),
        }
    }

    pub fn revisionable(&self) -> RevisionableId {
        self.revisionable
    }

    fn invalidate(&self, number: RevisionNumber) {
        self.exists_cache.lock().pop(&number);
    }
}

impl RevisionStorage for TableStorage {
    fn load_revision(&self, number: RevisionNumber) -> Result<RevisionData> {
        let inner = self.table.inner.read();
        let row = inner
            .rows
            .get(&self.revisionable)
            .and_then(|rows| rows.get(&number))
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
        Ok(self
            .table
            .inner
            .read()
            .rows
            .get(&self.revisionable)
            .map(|rows| rows.len())
            .unwrap_or(0))
    }

    fn revision_exists(&self, number: RevisionNumber, force_live_check: bool) -> Result<bool> {
        if !force_live_check {
            if let Some(cached) = self.exists_cache.lock().get(&number) {
                return Ok(*cached);
            }
        }

        let exists = self
            .table
            .inner
            .read()
            .rows
            .get(&self.revisionable)
            .map(|rows| rows.contains_key(&number))
            .unwrap_or(false);

        self.exists_cache.lock().put(number, exists);
        Ok(exists)
    }

    fn next_revision(&self, input: NewRevision) -> Result<RevisionNumber> {
        let number;
        {
            let mut inner = self.table.inner.write();

            let counter = inner.counters.entry(self.revisionable).or_insert(1);
            number = RevisionNumber(*counter);
            *counter += 1;

            // MAX()+1 over every row whose owner shares this handle's context
            // columns. Serialized only by this table's write lock; see the
            // trait-level contract for the cross-process caveat.
            let context = inner.contexts.get(&self.revisionable).cloned();
            let pretty = inner
                .rows
                .iter()
                .filter(|(id, _)| inner.contexts.get(*id) == context.as_ref())
                .flat_map(|(_, rows)| rows.values().map(|r| r.pretty))
                .max()
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

            inner
                .rows
                .entry(self.revisionable)
                .or_default()
                .insert(number, row);
        }

        self.invalidate(number);
        self.table.save_unless_in_transaction()?;
        Ok(number)
    }

    fn remove_revision(&self, number: RevisionNumber) -> Result<()> {
        {
            let mut inner = self.table.inner.write();
            let removed = inner
                .rows
                .get_mut(&self.revisionable)
                .and_then(|rows| rows.remove(&number));
            if removed.is_none() {
                return Err(RevisionError::RevisionDoesNotExist(number));
            }
            if let Some(keys) = inner.data_keys.get_mut(&self.revisionable) {
                keys.retain(|(n, _), _| *n != number);
            }
        }

        tracing::debug!(revisionable = %self.revisionable, revision = %number, "removed revision");

        self.invalidate(number);
        self.table.save_unless_in_transaction()
    }

    fn revisions(&self) -> Result<Vec<RevisionNumber>> {
        let inner = self.table.inner.read();
        let mut rows: Vec<&RevisionData> = inner
            .rows
            .get(&self.revisionable)
            .map(|rows| rows.values().collect())
            .unwrap_or_default();
        sort_by_date(&mut rows);
        Ok(rows.into_iter().map(|r| r.number).collect())
    }

    fn write_data_key(&self, number: RevisionNumber, key: &str, value: Value) -> Result<()> {
        {
            let mut inner = self.table.inner.write();
            let exists = inner
                .rows
                .get(&self.revisionable)
                .map(|rows| rows.contains_key(&number))
                .unwrap_or(false);
            if !exists {
                return Err(RevisionError::RevisionDoesNotExist(number));
            }
            inner
                .data_keys
                .entry(self.revisionable)
                .or_default()
                .insert((number, format!("{DATA_KEY_PREFIX}{key}")), value);
        }
        self.table.save_unless_in_transaction()
    }

    fn read_data_key(&self, number: RevisionNumber, key: &str) -> Result<Option<Value>> {
        Ok(self
            .table
            .inner
            .read()
            .data_keys
            .get(&self.revisionable)
            .and_then(|keys| keys.get(&(number, format!("{DATA_KEY_PREFIX}{key}"))))
            .cloned())
    }

    fn data_keys(&self, number: RevisionNumber) -> Result<Vec<String>> {
        Ok(self
            .table
            .inner
            .read()
            .data_keys
            .get(&self.revisionable)
            .map(|keys| {
                keys.keys()
                    .filter(|(n, _)| *n == number)
                    .map(|(_, k)| k.trim_start_matches(DATA_KEY_PREFIX).to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn write_revision_keys(&self, number: RevisionNumber, data: &CustomData) -> Result<()> {
        {
            let mut inner = self.table.inner.write();
            let row = inner
                .rows
                .get_mut(&self.revisionable)
                .and_then(|rows| rows.get_mut(&number))
                .ok_or(RevisionError::RevisionDoesNotExist(number))?;
            for (key, value) in data {
                row.custom.insert(key.clone(), value.clone());
            }
        }
        self.table.save_unless_in_transaction()
    }

    fn transaction_active(&self) -> bool {
        self.table.transaction_active()
    }

    fn begin_transaction(&self) -> Result<()> {
        self.table.begin_transaction()
    }

    fn commit_transaction(&self) -> Result<()> {
        self.table.commit_transaction()
    }

    fn rollback_transaction(&self) -> Result<()> {
        // The cache may hold entries for rolled-back rows.
        self.exists_cache.lock().clear();
        self.table.rollback_transaction()
    }
}
