//! State graph: named states, dependency edges, automatic transitions.

use crate::error::{Result, RevisionError};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Handle into a [`StateGraph`]. Only valid for the graph that issued it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateRef(pub(crate) usize);

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateRef({})", self.0)
    }
}

/// One node in a state graph.
#[derive(Clone, Debug)]
pub struct State {
    /// Machine name, unique within the graph.
    pub name: String,

    /// Human-facing label.
    pub label: String,

    /// Hint for admin widgets (not interpreted by the engine).
    pub ui_type: String,

    /// Whether records in this state accept edits.
    pub changes_allowed: bool,

    /// Whether this is the graph's initial state.
    pub is_initial: bool,

    /// States that may follow this one.
    pub(crate) dependencies: BTreeSet<StateRef>,

    /// State entered automatically on structural change, when no explicit
    /// transition happened in the same transaction.
    pub(crate) structural_change_target: Option<StateRef>,

    /// Timed transition: target plus delay after the revision timestamp.
    pub(crate) timed_change: Option<(StateRef, Duration)>,
}

/// Immutable graph of states for one record type.
///
/// Built once via [`StateGraphBuilder`], then shared read-only.
#[derive(Clone, Debug)]
pub struct StateGraph {
    states: Vec<State>,
    by_name: HashMap<String, StateRef>,
    initial: Option<StateRef>,
}

impl StateGraph {
    pub fn builder() -> StateGraphBuilder {
        StateGraphBuilder::new()
    }

    /// The state marked as initial.
    ///
    /// The type name is unknown at this level, so the error carries no type;
    /// callers going through the registry get it attached there.
    pub fn initial_state(&self) -> Option<StateRef> {
        self.initial
    }

    /// Look up a state by name.
    pub fn by_name(&self, name: &str) -> Result<StateRef> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RevisionError::UnknownState(name.to_string()))
    }

    pub fn state(&self, s: StateRef) -> &State {
        &self.states[s.0]
    }

    pub fn name(&self, s: StateRef) -> &str {
        &self.states[s.0].name
    }

    /// True if `to` may follow `from`.
    pub fn has_dependency(&self, from: StateRef, to: StateRef) -> bool {
        self.states[from.0].dependencies.contains(&to)
    }

    /// Automatic transition target on structural change, if any.
    pub fn structural_change_target(&self, s: StateRef) -> Option<StateRef> {
        self.states[s.0].structural_change_target
    }

    /// Timed transition for a state, if any.
    pub fn timed_change(&self, s: StateRef) -> Option<(StateRef, Duration)> {
        self.states[s.0].timed_change
    }

    /// A state with no outgoing dependency edges is terminal.
    pub fn is_terminal(&self, s: StateRef) -> bool {
        self.states[s.0].dependencies.is_empty()
    }

    pub fn states(&self) -> impl Iterator<Item = (StateRef, &State)> {
        self.states.iter().enumerate().map(|(i, s)| (StateRef(i), s))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Mutable construction side of a [`StateGraph`].
#[derive(Debug, Default)]
pub struct StateGraphBuilder {
    states: Vec<State>,
    by_name: HashMap<String, StateRef>,
    initial: Option<StateRef>,
}

impl StateGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state. Duplicate names are a contract violation.
    pub fn register_state(
        &mut self,
        name: impl Into<String>,
        label: impl Into<String>,
        ui_type: impl Into<String>,
        changes_allowed: bool,
        is_initial: bool,
    ) -> Result<StateRef> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(RevisionError::DuplicateState(name));
        }

        let state_ref = StateRef(self.states.len());

        if is_initial {
            if self.initial.is_some() {
                return Err(RevisionError::DuplicateInitialState(name));
            }
            self.initial = Some(state_ref);
        }

        self.states.push(State {
            name: name.clone(),
            label: label.into(),
            ui_type: ui_type.into(),
            changes_allowed,
            is_initial,
            dependencies: BTreeSet::new(),
            structural_change_target: None,
            timed_change: None,
        });
        self.by_name.insert(name, state_ref);

        Ok(state_ref)
    }

    /// Allow `to` to follow `from`.
    pub fn add_dependency(&mut self, from: StateRef, to: StateRef) -> &mut Self {
        self.states[from.0].dependencies.insert(to);
        self
    }

    /// Set the automatic transition applied on structural change.
    pub fn set_structural_change_target(&mut self, state: StateRef, target: StateRef) -> &mut Self {
        self.states[state.0].structural_change_target = Some(target);
        self
    }

    /// Set a timed transition: `state` moves to `target` once `delay` has
    /// elapsed since the current revision's timestamp.
    pub fn set_timed_change(
        &mut self,
        state: StateRef,
        target: StateRef,
        delay: Duration,
    ) -> &mut Self {
        self.states[state.0].timed_change = Some((target, delay));
        self
    }

    pub fn build(self) -> StateGraph {
        StateGraph {
            states: self.states,
            by_name: self.by_name,
            initial: self.initial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_graph() -> (StateGraph, StateRef, StateRef, StateRef) {
        let mut builder = StateGraph::builder();
        let draft = builder
            .register_state("draft", "Draft", "badge", true, true)
            .unwrap();
        let approved = builder
            .register_state("approved", "Approved", "badge", false, false)
            .unwrap();
        let archived = builder
            .register_state("archived", "Archived", "badge", false, false)
            .unwrap();
        builder.add_dependency(draft, approved);
        builder.add_dependency(approved, archived);
        (builder.build(), draft, approved, archived)
    }

    #[test]
    fn test_initial_state() {
        let (graph, draft, _, _) = draft_graph();
        assert_eq!(graph.initial_state(), Some(draft));
    }

    #[test]
    fn test_by_name() {
        let (graph, _, approved, _) = draft_graph();
        assert_eq!(graph.by_name("approved").unwrap(), approved);
        assert!(matches!(
            graph.by_name("missing"),
            Err(RevisionError::UnknownState(_))
        ));
    }

    #[test]
    fn test_dependencies() {
        let (graph, draft, approved, archived) = draft_graph();
        assert!(graph.has_dependency(draft, approved));
        assert!(!graph.has_dependency(draft, archived));
        assert!(!graph.has_dependency(approved, draft));
    }

    #[test]
    fn test_terminal_states() {
        let (graph, draft, _, archived) = draft_graph();
        assert!(graph.is_terminal(archived));
        assert!(!graph.is_terminal(draft));
    }

    #[test]
    fn test_duplicate_state_rejected() {
        let mut builder = StateGraph::builder();
        builder
            .register_state("draft", "Draft", "badge", true, true)
            .unwrap();
        let result = builder.register_state("draft", "Draft 2", "badge", true, false);
        assert!(matches!(result, Err(RevisionError::DuplicateState(name)) if name == "draft"));
    }

    #[test]
    fn test_duplicate_initial_rejected() {
        let mut builder = StateGraph::builder();
        builder
            .register_state("a", "A", "badge", true, true)
            .unwrap();
        let result = builder.register_state("b", "B", "badge", true, true);
        assert!(matches!(
            result,
            Err(RevisionError::DuplicateInitialState(name)) if name == "b"
        ));
    }

    #[test]
    fn test_structural_and_timed_targets() {
        let mut builder = StateGraph::builder();
        let draft = builder
            .register_state("draft", "Draft", "badge", true, true)
            .unwrap();
        let review = builder
            .register_state("review", "In Review", "badge", false, false)
            .unwrap();
        builder.add_dependency(draft, review);
        builder.set_structural_change_target(draft, review);
        builder.set_timed_change(review, draft, Duration::from_secs(60));
        let graph = builder.build();

        assert_eq!(graph.structural_change_target(draft), Some(review));
        assert_eq!(
            graph.timed_change(review),
            Some((draft, Duration::from_secs(60)))
        );
        assert_eq!(graph.structural_change_target(review), None);
    }
}
