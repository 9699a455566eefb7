//! Engine events for external collaborators.
//!
//! Events raised inside a unit of work are buffered and delivered only when
//! the transaction commits, so rolled-back or simulated work is never
//! broadcast. Consumers attach through the [`EventBus`] seam; the default
//! channel-backed bus drops events rather than blocking a slow consumer.

use crate::types::{RevisionableId, RevisionNumber, TransactionOutcome};
use serde::{Deserialize, Serialize};

/// Events emitted by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A state transition was applied inside a transaction.
    StateChanged {
        revisionable: RevisionableId,
        from: Option<String>,
        to: String,
    },

    /// A logical part was flagged as structural (fires once per transaction).
    StructureChanged {
        revisionable: RevisionableId,
        part: String,
    },

    /// A transaction resolved.
    TransactionEnded {
        revisionable: RevisionableId,
        outcome: TransactionOutcome,
        revision: RevisionNumber,
    },
}

/// Sink for engine events.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event: EngineEvent) {}
}

/// Event bus backed by a bounded crossbeam channel.
///
/// Events are dropped when the buffer is full (slow consumer); the engine
/// never blocks on event delivery.
pub struct ChannelEventBus {
    sender: crossbeam_channel::Sender<EngineEvent>,
}

impl ChannelEventBus {
    /// Create a bus with the given buffer size, returning the receiver half.
    pub fn new(buffer_size: usize) -> (Self, crossbeam_channel::Receiver<EngineEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(buffer_size);
        (Self { sender }, receiver)
    }
}

impl EventBus for ChannelEventBus {
    fn emit(&self, event: EngineEvent) {
        let _ = self.sender.try_send(event);
    }
}
