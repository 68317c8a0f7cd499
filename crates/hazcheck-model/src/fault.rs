//! Faults and their activation-mode semantics.

use crate::choice::{ChoiceResolver, NondeterminismError};
use crate::fault_set::FaultSet;
use std::fmt;
use thiserror::Error;

/// The maximum number of faults supported per model, bounded by the
/// [`FaultSet`] bitset representation.
pub const MAX_FAULT_COUNT: usize = 63;

/// Error raised when a model declares more faults than the engine supports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("models with more than {MAX_FAULT_COUNT} faults are not supported, got {0}")]
pub struct FaultLimitExceeded(pub usize);

/// Checks whether the number of faults is supported.
pub fn check_fault_count(count: usize) -> Result<(), FaultLimitExceeded> {
    if count > MAX_FAULT_COUNT {
        return Err(FaultLimitExceeded(count));
    }
    Ok(())
}

/// How a fault participates in transition generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    /// The fault is always activated.
    Forced,
    /// The fault is never activated.
    Suppressed,
    /// Fault activation branches nondeterministically.
    Nondeterministic,
}

/// An injectable failure behavior attached to a component.
///
/// A fault is created once at model-load time and lives for the entire run:
/// `reset` at the start of every simulated step, `try_activate` /
/// `undo_activation` during transition generation.
pub struct Fault {
    identifier: usize,
    name: String,
    activation: Activation,
    probability_of_occurrence: Option<f64>,
    /// Faults whose effect this fault's activation dominates. Heuristic
    /// metadata only; never affects transition semantics.
    subsumed: FaultSet,

    // Transient per-step activation state.
    is_activated: bool,
    activation_is_unknown: bool,
    can_undo_activation: bool,
    choice_index: usize,
}

impl Fault {
    pub fn new(identifier: usize, name: impl Into<String>) -> Self {
        Self {
            identifier,
            name: name.into(),
            activation: Activation::Nondeterministic,
            probability_of_occurrence: None,
            subsumed: FaultSet::EMPTY,
            is_activated: false,
            activation_is_unknown: true,
            can_undo_activation: false,
            choice_index: 0,
        }
    }

    #[inline]
    pub fn identifier(&self) -> usize {
        self.identifier
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Sets the fault's activation mode. Must not be changed mid-traversal.
    pub fn set_activation(&mut self, activation: Activation) {
        self.activation = activation;
        self.is_activated = activation == Activation::Forced;
        self.activation_is_unknown = activation == Activation::Nondeterministic;
    }

    #[inline]
    pub fn probability_of_occurrence(&self) -> Option<f64> {
        self.probability_of_occurrence
    }

    pub fn set_probability_of_occurrence(&mut self, probability: Option<f64>) {
        self.probability_of_occurrence = probability;
    }

    /// Whether the fault is activated on the current path, thereby inducing an
    /// error or possibly a failure.
    #[inline]
    pub fn is_activated(&self) -> bool {
        self.is_activated
    }

    /// The set of faults directly subsumed by this fault.
    #[inline]
    pub fn subsumed_faults(&self) -> FaultSet {
        self.subsumed
    }

    /// Declares the given faults to be subsumed by this instance. Subsumption
    /// metadata does not change the fault's effects and is only used by
    /// search heuristics.
    pub fn subsumes(&mut self, faults: FaultSet) {
        self.subsumed = self.subsumed.union(faults);
    }

    /// Resets the fault's activation state for the current step.
    pub fn reset(&mut self) {
        if self.activation != Activation::Nondeterministic {
            return;
        }
        self.activation_is_unknown = true;
        self.can_undo_activation = false;
        self.is_activated = false;
    }

    /// Tries to activate the fault. For a nondeterministic fault whose
    /// activation is still unknown this branches via the resolver: a weighted
    /// binary choice when an occurrence probability is assigned, an unweighted
    /// one otherwise. The position of the choice is remembered so that the
    /// activation can later be undone.
    pub fn try_activate(
        &mut self,
        resolver: &mut ChoiceResolver,
    ) -> Result<(), NondeterminismError> {
        if !self.activation_is_unknown {
            // The activation has been consumed; it can no longer be undone.
            self.can_undo_activation = false;
            return Ok(());
        }

        match self.activation {
            Activation::Forced => {
                self.is_activated = true;
                self.can_undo_activation = false;
            }
            Activation::Suppressed => {
                self.is_activated = false;
                self.can_undo_activation = false;
            }
            Activation::Nondeterministic => {
                self.is_activated = match self.probability_of_occurrence {
                    Some(p) => resolver.choose_weighted(&[1.0 - p, p])? == 1,
                    None => resolver.choose_index(2)? == 1,
                };
                self.choice_index = resolver.last_choice_index();
                self.can_undo_activation = true;
            }
        }

        self.activation_is_unknown = false;
        Ok(())
    }

    /// Undoes the activation decision when it is known to have no observable
    /// effect in the current step, collapsing the corresponding branch of the
    /// choice tree. Calling this twice, or after the activation has been
    /// consumed by another `try_activate`, is a no-op.
    pub fn undo_activation(&mut self, resolver: &mut ChoiceResolver) {
        if !resolver.use_forward_optimization() {
            return;
        }
        if !self.can_undo_activation {
            return;
        }

        self.can_undo_activation = false;
        self.activation_is_unknown = true;
        resolver.forward_untaken_choices_at(self.choice_index);
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (#{}) [{:?}]",
            self.name, self.identifier, self.activation
        )
    }
}

/// The transitive subsumption closure of a fault universe.
///
/// Computed once per fault graph and immutable thereafter; a pure derived
/// value that heuristics may consult without affecting correctness.
pub struct SubsumptionClosure {
    closure: Vec<FaultSet>,
}

impl SubsumptionClosure {
    /// Computes the transitive closure by fixed-point iteration over the
    /// direct subsumption sets.
    pub fn new(faults: &[Fault]) -> Self {
        let direct: Vec<(usize, FaultSet)> = faults
            .iter()
            .map(|f| (f.identifier(), f.subsumed_faults()))
            .collect();

        let closure = faults
            .iter()
            .map(|fault| {
                let mut subsumed = FaultSet::singleton(fault.identifier());
                loop {
                    let mut next = subsumed;
                    for &(id, direct_set) in &direct {
                        if subsumed.contains(id) {
                            next = next.union(direct_set);
                        }
                    }
                    if next == subsumed {
                        break;
                    }
                    subsumed = next;
                }
                subsumed
            })
            .collect();

        Self { closure }
    }

    /// All faults subsumed by the given set, including the set itself.
    pub fn subsumed_by(&self, faults: &[Fault], set: FaultSet) -> FaultSet {
        let mut result = set;
        for (slot, fault) in faults.iter().enumerate() {
            if set.contains(fault.identifier()) {
                result = result.union(self.closure[slot]);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_paths(fault: &mut Fault, resolver: &mut ChoiceResolver) -> Vec<bool> {
        let mut outcomes = Vec::new();
        resolver.prepare_next_state();
        while resolver.prepare_next_path().unwrap() {
            fault.reset();
            fault.try_activate(resolver).unwrap();
            outcomes.push(fault.is_activated());
        }
        outcomes
    }

    #[test]
    fn test_forced_fault_always_activates() {
        let mut fault = Fault::new(0, "F");
        fault.set_activation(Activation::Forced);
        let mut resolver = ChoiceResolver::new(true);
        assert_eq!(run_paths(&mut fault, &mut resolver), vec![true]);
    }

    #[test]
    fn test_suppressed_fault_never_activates() {
        let mut fault = Fault::new(0, "F");
        fault.set_activation(Activation::Suppressed);
        let mut resolver = ChoiceResolver::new(true);
        assert_eq!(run_paths(&mut fault, &mut resolver), vec![false]);
    }

    #[test]
    fn test_nondeterministic_fault_branches() {
        let mut fault = Fault::new(0, "F");
        let mut resolver = ChoiceResolver::new(true);
        assert_eq!(run_paths(&mut fault, &mut resolver), vec![false, true]);
    }

    #[test]
    fn test_second_activation_in_same_step_is_deterministic() {
        let mut fault = Fault::new(0, "F");
        let mut resolver = ChoiceResolver::new(true);
        resolver.prepare_next_state();
        assert!(resolver.prepare_next_path().unwrap());

        fault.reset();
        fault.try_activate(&mut resolver).unwrap();
        let first = fault.is_activated();
        fault.try_activate(&mut resolver).unwrap();
        assert_eq!(fault.is_activated(), first);
    }

    #[test]
    fn test_undo_prunes_untaken_sibling() {
        let mut fault = Fault::new(0, "F");
        let mut resolver = ChoiceResolver::new(true);

        let mut paths = 0;
        resolver.prepare_next_state();
        while resolver.prepare_next_path().unwrap() {
            fault.reset();
            fault.try_activate(&mut resolver).unwrap();
            // The activation is never observed this step.
            fault.undo_activation(&mut resolver);
            paths += 1;
        }

        // The activated sibling is forwarded; only one path remains.
        assert_eq!(paths, 1);
    }

    #[test]
    fn test_undo_without_forward_optimization_is_noop() {
        let mut fault = Fault::new(0, "F");
        let mut resolver = ChoiceResolver::new(false);

        let mut paths = 0;
        resolver.prepare_next_state();
        while resolver.prepare_next_path().unwrap() {
            fault.reset();
            fault.try_activate(&mut resolver).unwrap();
            fault.undo_activation(&mut resolver);
            paths += 1;
        }

        assert_eq!(paths, 2);
    }

    #[test]
    fn test_subsumption_closure_is_transitive() {
        let mut a = Fault::new(0, "A");
        let mut b = Fault::new(1, "B");
        let c = Fault::new(2, "C");
        a.subsumes(FaultSet::singleton(1));
        b.subsumes(FaultSet::singleton(2));

        let faults = [a, b, c];
        let closure = SubsumptionClosure::new(&faults);
        let subsumed = closure.subsumed_by(&faults, FaultSet::singleton(0));
        assert_eq!(subsumed, [0, 1, 2].into_iter().collect());
    }

    #[test]
    fn test_fault_count_limit() {
        assert!(check_fault_count(63).is_ok());
        assert!(check_fault_count(64).is_err());
    }
}
