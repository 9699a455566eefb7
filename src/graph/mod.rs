//! Per-type state graphs and the type registry.
//!
//! One immutable [`StateGraph`] exists per record type, built once and shared
//! via `Arc` across every instance of that type. Instances carry only a
//! cursor (the current state name), never a private copy of the graph.

mod registry;
mod states;

pub use registry::{
    CopyOperation, CopyPart, StateChangeContext, StateValidator, TypeDefinition, TypeRegistry,
};
pub use states::{State, StateGraph, StateGraphBuilder, StateRef};
