//! # Revision Store
//!
//! A revisionable record engine: records keep an append-only history of
//! immutable revisions, carry a typed state with a dependency graph
//! restricting legal transitions, and apply edits inside transaction-like
//! units of work that decide, after the fact, whether a new revision must
//! be minted.
//!
//! ## Core Concepts
//!
//! - **Revisionable**: a record whose history is a sequence of immutable
//!   revisions
//! - **StateGraph**: per-type graph of states and the transitions allowed
//!   between them, shared read-only across all instances of the type
//! - **Transactions**: units of work that mint a new revision on structural
//!   change and rewrite custom columns in place otherwise
//! - **Storage backends**: table-backed, in-memory, and a frozen stub
//!
//! ## Example
//!
//! ```ignore
//! use revstore::{
//!     Collaborators, MemoryStorage, Revisionable, RevisionableId, StateGraph,
//!     TypeDefinition, TypeId, TypeRegistry, UserId,
//! };
//!
//! let mut builder = StateGraph::builder();
//! let draft = builder.register_state("draft", "Draft", "badge", true, true)?;
//! let approved = builder.register_state("approved", "Approved", "badge", false, false)?;
//! builder.add_dependency(draft, approved);
//!
//! let mut registry = TypeRegistry::new();
//! let doc = TypeId::new("document");
//! registry.register(doc.clone(), TypeDefinition::new(builder.build()));
//!
//! let storage = Box::new(MemoryStorage::new(RevisionableId(42), users));
//! let mut record = Revisionable::create(
//!     RevisionableId(42), &registry, &doc, storage,
//!     Collaborators::default(), UserId(1), "alice",
//! )?;
//!
//! record.make_state("approved", UserId(1), "alice", None)?;
//! ```

pub mod changelog;
pub mod copy;
pub mod error;
pub mod events;
pub mod graph;
pub mod revisionable;
pub mod storage;
pub mod types;
pub mod users;

// Re-exports
pub use changelog::{ChangelogSink, MemoryChangelog, NullChangelog};
pub use copy::{CopyOptions, CopyRevisionEngine};
pub use error::{Result, RevisionError};
pub use events::{ChannelEventBus, EngineEvent, EventBus, NullEventBus};
pub use graph::{
    CopyOperation, CopyPart, State, StateChangeContext, StateGraph, StateGraphBuilder, StateRef,
    StateValidator, TypeDefinition, TypeRegistry,
};
pub use revisionable::{Collaborators, Revisionable};
pub use storage::{MemoryScope, MemoryStorage, RevisionStorage, RevisionTable, StubStorage, TableStorage};
pub use types::*;
pub use users::{PermissiveUserProvider, StaticUserProvider, UserProvider};
