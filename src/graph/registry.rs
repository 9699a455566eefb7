//! Type registry: per-type state graph, validators, and copy parts.
//!
//! The registry is owned by the application and injected wherever type-level
//! behavior is needed. Validators and copy parts are resolved here at
//! registration time; nothing is looked up by naming convention at runtime.

use crate::error::{Result, RevisionError};
use crate::graph::states::{StateGraph, StateRef};
use crate::revisionable::Revisionable;
use crate::types::{CustomData, RevisionData, RevisionableId, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read-only view of a pending state change, handed to validators.
#[derive(Debug)]
pub struct StateChangeContext<'a> {
    pub revisionable: RevisionableId,
    pub from: Option<&'a str>,
    pub to: &'a str,
    pub custom: &'a CustomData,
}

/// Validator run when a record enters a state.
pub type StateValidator = Arc<dyn Fn(&StateChangeContext<'_>) -> Result<()> + Send + Sync>;

/// One type-specific step of a revision copy.
pub trait CopyOperation: Send + Sync {
    /// Apply this part of the copy: `source` is the loaded source revision,
    /// `target` the entity receiving the copy (inside an open transaction).
    fn apply(&self, source: &RevisionData, target: &mut Revisionable) -> Result<()>;
}

/// Named copy step, run in registration order by the copy engine.
#[derive(Clone)]
pub struct CopyPart {
    pub name: String,
    pub op: Arc<dyn CopyOperation>,
}

impl fmt::Debug for CopyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CopyPart({})", self.name)
    }
}

/// Everything the engine knows about one record type.
pub struct TypeDefinition {
    type_id: TypeId,
    graph: Arc<StateGraph>,
    validators: HashMap<String, StateValidator>,
    copy_parts: Vec<CopyPart>,
}

impl fmt::Debug for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("type_id", &self.type_id)
            .field("states", &self.graph.len())
            .field("copy_parts", &self.copy_parts)
            .finish()
    }
}

impl TypeDefinition {
    pub fn new(graph: StateGraph) -> Self {
        Self {
            // Placeholder until registered; `TypeRegistry::register` rebinds it.
            type_id: TypeId::new(""),
            graph: Arc::new(graph),
            validators: HashMap::new(),
            copy_parts: Vec::new(),
        }
    }

    /// Attach a validator for entry into the named state.
    pub fn with_validator(mut self, state: impl Into<String>, validator: StateValidator) -> Self {
        self.validators.insert(state.into(), validator);
        self
    }

    /// Append a named copy part. Parts run in the order they were added.
    pub fn with_copy_part(mut self, name: impl Into<String>, op: Arc<dyn CopyOperation>) -> Self {
        self.copy_parts.push(CopyPart {
            name: name.into(),
            op,
        });
        self
    }

    pub fn type_id(&self) -> &TypeId {
        &self.type_id
    }

    /// The shared state graph for this type.
    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.graph
    }

    /// Initial state, with the type attached to the failure.
    pub fn initial_state(&self) -> Result<StateRef> {
        self.graph
            .initial_state()
            .ok_or_else(|| RevisionError::NoInitialState(self.type_id.clone()))
    }

    pub fn validator(&self, state: &str) -> Option<&StateValidator> {
        self.validators.get(state)
    }

    pub fn copy_parts(&self) -> &[CopyPart] {
        &self.copy_parts
    }
}

/// Registry of record types, built at application startup and then shared.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, Arc<TypeDefinition>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type definition under the given ID.
    pub fn register(&mut self, type_id: TypeId, mut definition: TypeDefinition) {
        definition.type_id = type_id.clone();
        self.types.insert(type_id, Arc::new(definition));
    }

    /// Look up a registered type.
    pub fn definition(&self, type_id: &TypeId) -> Result<Arc<TypeDefinition>> {
        self.types
            .get(type_id)
            .cloned()
            .ok_or_else(|| RevisionError::UnknownType(type_id.clone()))
    }

    pub fn contains(&self, type_id: &TypeId) -> bool {
        self.types.contains_key(type_id)
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &TypeId> {
        self.types.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_graph() -> StateGraph {
        let mut builder = StateGraph::builder();
        let draft = builder
            .register_state("draft", "Draft", "badge", true, true)
            .unwrap();
        let done = builder
            .register_state("done", "Done", "badge", false, false)
            .unwrap();
        builder.add_dependency(draft, done);
        builder.build()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TypeRegistry::new();
        let doc = TypeId::new("document");
        registry.register(doc.clone(), TypeDefinition::new(simple_graph()));

        let def = registry.definition(&doc).unwrap();
        assert_eq!(def.type_id(), &doc);
        assert_eq!(def.graph().len(), 2);
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::new();
        let result = registry.definition(&TypeId::new("missing"));
        assert!(matches!(result, Err(RevisionError::UnknownType(_))));
    }

    #[test]
    fn test_no_initial_state_names_type() {
        let mut registry = TypeRegistry::new();
        let mut builder = StateGraph::builder();
        builder
            .register_state("only", "Only", "badge", true, false)
            .unwrap();
        let t = TypeId::new("no-initial");
        registry.register(t.clone(), TypeDefinition::new(builder.build()));

        let def = registry.definition(&t).unwrap();
        match def.initial_state() {
            Err(RevisionError::NoInitialState(got)) => assert_eq!(got, t),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validator_registration() {
        let def = TypeDefinition::new(simple_graph()).with_validator(
            "done",
            Arc::new(|ctx: &StateChangeContext<'_>| {
                if ctx.custom.contains_key("label") {
                    Ok(())
                } else {
                    Err(RevisionError::StorageContractViolation(
                        "label required before done".into(),
                    ))
                }
            }),
        );

        assert!(def.validator("done").is_some());
        assert!(def.validator("draft").is_none());
    }
}
