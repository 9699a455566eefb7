//! Error types for the revision engine.

use crate::types::{RevisionNumber, TypeId, UserId};
use thiserror::Error;

/// Main error type for revision operations.
#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No current revision found")]
    NoCurrentRevision,

    #[error("Revision does not exist: {0}")]
    RevisionDoesNotExist(RevisionNumber),

    #[error("A transaction is already open on this revisionable")]
    TransactionAlreadyOpen,

    #[error("No transaction is open")]
    NoTransactionOpen,

    #[error("Invalid state change: {from:?} -> {to}")]
    InvalidStateChange { from: Option<String>, to: String },

    #[error("No initial state defined for type {0}")]
    NoInitialState(TypeId),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("State registered twice: {0}")]
    DuplicateState(String),

    #[error("State '{0}' marked initial, but an initial state already exists")]
    DuplicateInitialState(String),

    #[error("Unknown type: {0}")]
    UnknownType(TypeId),

    #[error("Unknown author: {0}")]
    UnknownAuthor(UserId),

    #[error("Cannot undo revision: {available} revision(s) available, need at least 2")]
    CannotUndoRevision { available: usize },

    #[error("Operation not allowed on stub: {0}")]
    OperationNotAllowedOnStub(&'static str),

    #[error("Revisionable type mismatch: expected {expected}, got {got}")]
    RevisionableTypeMismatch { expected: TypeId, got: TypeId },

    #[error("Storage contract violation: {0}")]
    StorageContractViolation(String),

    #[error("No completed transaction available")]
    LastTransactionNotAvailable,

    #[error("Failed to load revision {number}: {reason}")]
    RevisionLoadFailed {
        number: RevisionNumber,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid table format: {0}")]
    InvalidFormat(String),

    #[error("Revision table is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for RevisionError {
    fn from(e: serde_json::Error) -> Self {
        RevisionError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RevisionError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RevisionError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RevisionError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RevisionError::Deserialization(e.to_string())
    }
}

/// Result type for revision operations.
pub type Result<T> = std::result::Result<T, RevisionError>;
