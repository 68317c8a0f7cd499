//! Candidate transitions and the pluggable transition pipeline.

use crate::error::{CapacityError, CapacityKind};
use crate::storage::StateIndex;
use crate::traverser::TraversalContext;
use hazcheck_model::{FaultSet, StateFormulaSet};
use smallvec::SmallVec;

/// A speculatively produced transition, one per enumerated path.
///
/// Modifiers may clear `is_valid` (a cheap logical delete that keeps the
/// candidate in the buffer) or rewrite the target bytes; only valid
/// candidates reach deduplication and the registered actions.
#[derive(Debug, Clone)]
pub struct CandidateTransition {
    /// The full target state vector, including reserved header bytes.
    pub target: Box<[u8]>,
    /// The faults that fired on the path producing this transition.
    pub activated_faults: FaultSet,
    /// The formula labels holding in the target state.
    pub formulas: StateFormulaSet,
    /// Opaque path probability, present when a weighted choice occurred.
    pub probability: Option<f64>,
    /// Cleared by modifiers to discard the candidate.
    pub is_valid: bool,
    /// The choice outcomes of the producing path, kept as the edge's replay record.
    pub choices: SmallVec<[i32; 8]>,
    /// The target's unique state index, assigned during deduplication.
    pub target_index: Option<StateIndex>,
}

/// The bounded per-state candidate buffer.
impl CandidateTransition {
    /// A valid candidate with no recorded choices, as produced for a path
    /// without nondeterminism.
    pub fn new(target: Box<[u8]>, activated_faults: FaultSet, formulas: StateFormulaSet) -> Self {
        Self {
            target,
            activated_faults,
            formulas,
            probability: None,
            is_valid: true,
            choices: SmallVec::new(),
            target_index: None,
        }
    }
}

pub struct TransitionSet {
    transitions: Vec<CandidateTransition>,
    capacity: usize,
}

impl TransitionSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            transitions: Vec::new(),
            capacity,
        }
    }

    /// Appends a candidate. Fails fast when the configured successor
    /// capacity is insufficient.
    pub fn push(&mut self, transition: CandidateTransition) -> Result<(), CapacityError> {
        if self.transitions.len() >= self.capacity {
            return Err(CapacityError {
                kind: CapacityKind::Successors,
                limit: self.capacity,
            });
        }
        self.transitions.push(transition);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    /// The number of computed candidates, including invalidated ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateTransition> {
        self.transitions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CandidateTransition> {
        self.transitions.iter_mut()
    }

    /// The surviving valid candidates.
    pub fn valid(&self) -> impl Iterator<Item = &CandidateTransition> {
        self.transitions.iter().filter(|t| t.is_valid)
    }
}

/// Rewrites or invalidates candidate transitions between generation and
/// deduplication. Modifiers must never add candidates.
///
/// A modifier may reserve leading bytes of the state vector to carry
/// auxiliary search-only state (e.g. a fault-order automaton); the traverser
/// assigns each modifier its byte range before the run starts.
pub trait TransitionModifier: Send {
    /// The number of reserved leading state-vector bytes this modifier needs.
    fn header_bytes(&self) -> usize {
        0
    }

    /// Receives the offset of this modifier's reserved header range.
    fn assign_header_offset(&mut self, _offset: usize) {}

    /// Modifies the candidates computed for one source state. `source` is
    /// `None` for initial transitions.
    fn modify(&mut self, transitions: &mut TransitionSet, source: Option<&[u8]>, is_initial: bool);
}

/// Factory producing one modifier instance per worker.
pub type ModifierFactory = Box<dyn Fn() -> Box<dyn TransitionModifier> + Send + Sync>;

/// Observes every deduplicated (source, transition) pair exactly once.
/// Invariant checking is an instance of this interface.
pub trait TransitionAction: Send + Sync {
    fn process_transition(
        &self,
        context: &TraversalContext,
        source: Option<StateIndex>,
        transition: &CandidateTransition,
        is_initial: bool,
    );
}

/// Observes the complete candidate set of one source state after
/// deduplication. State-graph building is an instance of this interface.
pub trait BatchedTransitionAction: Send + Sync {
    fn process_transitions(
        &self,
        context: &TraversalContext,
        source: Option<StateIndex>,
        transitions: &TransitionSet,
        is_initial: bool,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(byte: u8) -> CandidateTransition {
        CandidateTransition {
            target: vec![byte].into_boxed_slice(),
            activated_faults: FaultSet::EMPTY,
            formulas: StateFormulaSet::EMPTY,
            probability: None,
            is_valid: true,
            choices: SmallVec::new(),
            target_index: None,
        }
    }

    #[test]
    fn test_capacity_enforced() {
        let mut set = TransitionSet::new(2);
        set.push(candidate(0)).unwrap();
        set.push(candidate(1)).unwrap();
        let err = set.push(candidate(2)).unwrap_err();
        assert_eq!(err.kind, CapacityKind::Successors);
    }

    #[test]
    fn test_invalidated_candidates_stay_in_buffer() {
        let mut set = TransitionSet::new(16);
        set.push(candidate(0)).unwrap();
        set.push(candidate(1)).unwrap();

        for t in set.iter_mut() {
            if t.target[0] == 1 {
                t.is_valid = false;
            }
        }

        assert_eq!(set.len(), 2);
        assert_eq!(set.valid().count(), 1);
    }
}
