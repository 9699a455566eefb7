//! Frozen single-revision storage for stub objects.
//!
//! A stub revisionable exposes type-level behavior (state graph, copy parts)
//! without real persisted data. Its storage serves exactly one synthetic
//! revision and rejects every mutating call.

use crate::error::{Result, RevisionError};
use crate::storage::RevisionStorage;
use crate::types::{
    CustomData, NewRevision, PrettyNumber, RevisionData, RevisionNumber, Timestamp, UserId,
};
use serde_json::Value;

/// Backend serving a single frozen revision.
pub struct StubStorage {
    revision: RevisionData,
}

impl StubStorage {
    /// Build the frozen revision for the given state.
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            revision: RevisionData {
                number: RevisionNumber(1),
                pretty: PrettyNumber(1),
                owner: UserId(0),
                owner_name: "system".into(),
                timestamp: Timestamp::now(),
                comments: None,
                state: state.into(),
                custom: CustomData::new(),
            },
        }
    }
}

impl RevisionStorage for StubStorage {
    fn load_revision(&self, number: RevisionNumber) -> Result<RevisionData> {
        if number != self.revision.number {
            return Err(RevisionError::RevisionLoadFailed {
                number,
                reason: "stub storage has exactly one revision".into(),
            });
        }
        Ok(self.revision.clone())
    }

    fn count_revisions(&self) -> Result<usize> {
        Ok(1)
    }

    fn revision_exists(&self, number: RevisionNumber, _force_live_check: bool) -> Result<bool> {
        Ok(number == self.revision.number)
    }

    fn next_revision(&self, _input: NewRevision) -> Result<RevisionNumber> {
        Err(RevisionError::OperationNotAllowedOnStub("next_revision"))
    }

    fn remove_revision(&self, _number: RevisionNumber) -> Result<()> {
        Err(RevisionError::OperationNotAllowedOnStub("remove_revision"))
    }

    fn revisions(&self) -> Result<Vec<RevisionNumber>> {
        Ok(vec![self.revision.number])
    }

    fn write_data_key(&self, _number: RevisionNumber, _key: &str, _value: Value) -> Result<()> {
        Err(RevisionError::OperationNotAllowedOnStub("write_data_key"))
    }

    fn read_data_key(&self, _number: RevisionNumber, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn data_keys(&self, _number: RevisionNumber) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn write_revision_keys(&self, _number: RevisionNumber, _data: &CustomData) -> Result<()> {
        Err(RevisionError::OperationNotAllowedOnStub(
            "write_revision_keys",
        ))
    }

    fn supports_data_keys(&self) -> bool {
        false
    }

    fn transaction_active(&self) -> bool {
        false
    }

    fn begin_transaction(&self) -> Result<()> {
        Err(RevisionError::OperationNotAllowedOnStub("begin_transaction"))
    }

    fn commit_transaction(&self) -> Result<()> {
        Err(RevisionError::OperationNotAllowedOnStub(
            "commit_transaction",
        ))
    }

    fn rollback_transaction(&self) -> Result<()> {
        Err(RevisionError::OperationNotAllowedOnStub(
            "rollback_transaction",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serves_single_revision() {
        let storage = StubStorage::new("draft");
        assert_eq!(storage.count_revisions().unwrap(), 1);
        assert!(storage.revision_exists(RevisionNumber(1), true).unwrap());
        assert!(!storage.revision_exists(RevisionNumber(2), true).unwrap());

        let row = storage.load_revision(RevisionNumber(1)).unwrap();
        assert_eq!(row.pretty, PrettyNumber(1));
        assert_eq!(row.state, "draft");
    }

    #[test]
    fn test_rejects_mutation() {
        let storage = StubStorage::new("draft");
        assert!(matches!(
            storage.next_revision(NewRevision::new(UserId(1), "alice", "draft")),
            Err(RevisionError::OperationNotAllowedOnStub(_))
        ));
        assert!(matches!(
            storage.remove_revision(RevisionNumber(1)),
            Err(RevisionError::OperationNotAllowedOnStub(_))
        ));
        assert!(matches!(
            storage.write_revision_keys(RevisionNumber(1), &CustomData::new()),
            Err(RevisionError::OperationNotAllowedOnStub(_))
        ));
        assert!(!storage.supports_data_keys());
    }
}
