//! Core types for the revision engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a revisionable record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionableId(pub u64);

impl RevisionableId {
    /// Well-known identity of the frozen stub instance.
    pub const STUB: RevisionableId = RevisionableId(0);

    pub fn is_stub(self) -> bool {
        self == Self::STUB
    }
}

impl fmt::Debug for RevisionableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionableId({})", self.0)
    }
}

impl fmt::Display for RevisionableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record-type identifier. Cheap to clone, shared across instances.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(Arc<str>);

impl TypeId {
    pub fn new(name: impl AsRef<str>) -> Self {
        TypeId(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TypeId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TypeId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(TypeId::new(s))
    }
}

/// Globally unique (per revisionable) revision number. Monotonic, never reused.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RevisionNumber(pub u64);

impl RevisionNumber {
    pub fn next(self) -> Self {
        RevisionNumber(self.0 + 1)
    }
}

impl fmt::Debug for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-facing revision counter, scoped by the storage's context columns.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PrettyNumber(pub u64);

impl PrettyNumber {
    pub fn next(self) -> Self {
        PrettyNumber(self.0 + 1)
    }
}

impl fmt::Debug for PrettyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pretty({})", self.0)
    }
}

impl fmt::Display for PrettyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user acting as revision author.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    pub fn plus(self, d: std::time::Duration) -> Self {
        Timestamp(self.0 + d.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Custom column map attached to a revision. `serde_json::Value` clones are
/// deep, so handing a map across a copy boundary never aliases.
pub type CustomData = BTreeMap<String, Value>;

/// One immutable snapshot of a revisionable's data plus metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevisionData {
    /// Revision number (monotonic per revisionable).
    pub number: RevisionNumber,

    /// Scoped human-facing counter.
    pub pretty: PrettyNumber,

    /// Author of this revision.
    pub owner: UserId,

    /// Author name captured at write time.
    pub owner_name: String,

    /// When the revision was written.
    pub timestamp: Timestamp,

    /// Optional author comment.
    pub comments: Option<String>,

    /// State name at this revision.
    pub state: String,

    /// Custom column values.
    pub custom: CustomData,
}

/// Input for minting a new revision (before number/pretty are assigned).
#[derive(Clone, Debug)]
pub struct NewRevision {
    pub owner: UserId,
    pub owner_name: String,
    pub comments: Option<String>,
    pub state: String,
    pub custom: CustomData,
    /// Override timestamp (used when copying a revision with its date).
    pub timestamp: Option<Timestamp>,
}

impl NewRevision {
    pub fn new(owner: UserId, owner_name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            owner,
            owner_name: owner_name.into(),
            comments: None,
            state: state.into(),
            custom: CustomData::new(),
            timestamp: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_custom(mut self, custom: CustomData) -> Self {
        self.custom = custom;
        self
    }

    pub fn with_timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

/// How a completed transaction resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    /// No structural change; custom data written in place.
    Unchanged,
    /// A new revision was minted.
    Changed,
    /// The unit of work was discarded.
    RolledBack,
}

/// Result of a completed unit of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Revision that was current when the transaction opened.
    pub source_revision: RevisionNumber,

    /// Newly minted revision, if one was created.
    pub target_revision: Option<RevisionNumber>,

    pub outcome: TransactionOutcome,

    /// True if the transaction was run in simulation (always rolled back).
    pub simulated: bool,
}

impl Transaction {
    pub fn changed(&self) -> bool {
        self.outcome == TransactionOutcome::Changed
    }
}

/// Typed change operation recorded in the changelog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeOp {
    /// State transition.
    SetState {
        from: Option<String>,
        to: String,
    },

    /// Custom key written.
    SetKey {
        key: String,
        value: Value,
    },

    /// A logical part was flagged as a structural change.
    StructureChanged {
        part: String,
    },

    /// A revision was copied onto this revisionable.
    RevisionCopied {
        source_revisionable: RevisionableId,
        source_revision: RevisionNumber,
    },

    /// Application-defined operation.
    Custom {
        label: String,
        payload: Value,
    },
}

/// Structured change event tied to a revisionable/revision pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub revisionable: RevisionableId,
    pub revision: RevisionNumber,
    pub op: ChangeOp,
    pub timestamp: Timestamp,
    pub author: UserId,
}
