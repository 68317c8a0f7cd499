//! Pluggable heuristics reordering the DCCA candidate queue.
//!
//! Heuristics only influence the order in which candidate sets are evaluated
//! and may suggest additional sets to check early; the final result set never
//! depends on them.

use hazcheck_model::{Fault, FaultSet, SubsumptionClosure};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Reorders and extends the candidate sets checked by the DCCA search.
///
/// Suggestions are prepended to the queue (the front is checked first).
pub trait FaultSetHeuristic {
    /// Invoked once per cardinality level, before the level's sets are
    /// checked.
    fn augment(&mut self, cardinality: u32, sets_to_check: &mut VecDeque<FaultSet>);

    /// Observes the verdict of one checked set and may adapt the queue.
    fn update(&mut self, sets_to_check: &mut VecDeque<FaultSet>, checked: FaultSet, is_safe: bool);
}

/// Suggests maximally safe fault sets derived from the currently known
/// minimal critical ones: every combination that removes one fault from each
/// known critical set yields a candidate whose complement is checked early.
/// A safe verdict for such a large set prunes all of its subsets.
pub struct MaximalSafeSetHeuristic {
    cardinality_level: u32,
    minimal_critical_sets: Vec<Vec<usize>>,
    suggested_sets: Vec<FaultSet>,
    all_faults: FaultSet,
    forced: FaultSet,
    has_new_minimal_critical_sets: bool,
}

impl MaximalSafeSetHeuristic {
    /// `all_faults` is the non-suppressed fault universe; suggestions start
    /// at the given cardinality level.
    pub fn new(all_faults: FaultSet, forced: FaultSet) -> Self {
        Self::with_cardinality_level(all_faults, forced, 3)
    }

    pub fn with_cardinality_level(
        all_faults: FaultSet,
        forced: FaultSet,
        cardinality_level: u32,
    ) -> Self {
        Self {
            cardinality_level,
            minimal_critical_sets: Vec::new(),
            suggested_sets: Vec::new(),
            all_faults,
            forced,
            has_new_minimal_critical_sets: false,
        }
    }

    /// Seeds the heuristic with minimal critical sets known from a previous
    /// analysis of the same model.
    pub fn with_known_sets(
        all_faults: FaultSet,
        forced: FaultSet,
        known_critical_sets: impl IntoIterator<Item = FaultSet>,
    ) -> Self {
        let mut heuristic = Self::new(all_faults, forced);
        for set in known_critical_sets {
            heuristic.minimal_critical_sets.push(set.iter().collect());
        }
        heuristic.has_new_minimal_critical_sets = !heuristic.minimal_critical_sets.is_empty();
        heuristic
    }

    /// All combinations of removing one non-forced fault from each known
    /// minimal critical set.
    fn removal_combinations(&self, removed: FaultSet, set_index: usize, out: &mut Vec<FaultSet>) {
        if set_index >= self.minimal_critical_sets.len() {
            out.push(removed);
            return;
        }

        for &fault in &self.minimal_critical_sets[set_index] {
            if self.forced.contains(fault) {
                continue;
            }
            let next = if removed.contains(fault) {
                removed
            } else {
                removed.add(fault)
            };
            self.removal_combinations(next, set_index + 1, out);
        }
    }
}

impl FaultSetHeuristic for MaximalSafeSetHeuristic {
    fn augment(&mut self, cardinality: u32, sets_to_check: &mut VecDeque<FaultSet>) {
        if sets_to_check.is_empty()
            || self.minimal_critical_sets.is_empty()
            || self.cardinality_level > cardinality
            || !self.has_new_minimal_critical_sets
        {
            return;
        }

        self.suggested_sets.clear();
        self.has_new_minimal_critical_sets = false;

        let mut removals = Vec::new();
        self.removal_combinations(FaultSet::EMPTY, 0, &mut removals);
        for removed in removals {
            let suggestion = self.all_faults.difference(removed);
            trace!(?suggestion, "suggesting maximal safe candidate");
            sets_to_check.push_front(suggestion);
            self.suggested_sets.push(suggestion);
        }
    }

    fn update(
        &mut self,
        _sets_to_check: &mut VecDeque<FaultSet>,
        checked: FaultSet,
        is_safe: bool,
    ) {
        // Critical sets we suggested ourselves are likely non-minimal and
        // would degrade the quality of later suggestions.
        if is_safe || self.suggested_sets.contains(&checked) {
            return;
        }

        self.has_new_minimal_critical_sets = true;
        self.minimal_critical_sets.push(checked.iter().collect());
    }
}

/// Suggests the subsumption closure of each candidate set ahead of the set
/// itself: a critical verdict for the closure prunes every superset,
/// covering all candidates the closure dominates.
pub struct SubsumptionHeuristic {
    closure_by_identifier: Vec<FaultSet>,
    suggested: HashSet<FaultSet>,
}

impl SubsumptionHeuristic {
    pub fn new(faults: &[Fault]) -> Self {
        let closure = SubsumptionClosure::new(faults);
        let capacity = faults.iter().map(|f| f.identifier() + 1).max().unwrap_or(0);
        let mut closure_by_identifier: Vec<FaultSet> =
            (0..capacity).map(FaultSet::singleton).collect();
        for fault in faults {
            closure_by_identifier[fault.identifier()] =
                closure.subsumed_by(faults, FaultSet::singleton(fault.identifier()));
        }

        Self {
            closure_by_identifier,
            suggested: HashSet::new(),
        }
    }

    fn closure_of(&self, set: FaultSet) -> FaultSet {
        let mut result = set;
        for identifier in set.iter() {
            if let Some(&closure) = self.closure_by_identifier.get(identifier) {
                result = result.union(closure);
            }
        }
        result
    }
}

impl FaultSetHeuristic for SubsumptionHeuristic {
    fn augment(&mut self, _cardinality: u32, sets_to_check: &mut VecDeque<FaultSet>) {
        let closures: Vec<FaultSet> = sets_to_check
            .iter()
            .map(|&set| self.closure_of(set))
            .filter(|&closure| !sets_to_check.contains(&closure))
            .collect();

        for closure in closures {
            if self.suggested.insert(closure) {
                trace!(?closure, "suggesting subsumption closure");
                sets_to_check.push_front(closure);
            }
        }
    }

    fn update(
        &mut self,
        _sets_to_check: &mut VecDeque<FaultSet>,
        _checked: FaultSet,
        _is_safe: bool,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[usize]) -> FaultSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_maximal_safe_suggestions_are_complements() {
        let all = set(&[0, 1, 2, 3]);
        let mut heuristic = MaximalSafeSetHeuristic::with_cardinality_level(all, FaultSet::EMPTY, 0);
        let mut queue: VecDeque<FaultSet> = VecDeque::from([set(&[0, 1])]);

        heuristic.update(&mut queue, set(&[2, 3]), false);
        heuristic.augment(2, &mut queue);

        // Removing either fault of the critical set {2,3} yields the
        // complements {0,1,3} and {0,1,2}, suggested ahead of the queue.
        let suggestions: HashSet<FaultSet> = queue.iter().copied().take(2).collect();
        assert!(suggestions.contains(&set(&[0, 1, 3])));
        assert!(suggestions.contains(&set(&[0, 1, 2])));
    }

    #[test]
    fn test_no_suggestions_without_new_critical_sets() {
        let mut heuristic =
            MaximalSafeSetHeuristic::with_cardinality_level(set(&[0, 1]), FaultSet::EMPTY, 0);
        let mut queue: VecDeque<FaultSet> = VecDeque::from([set(&[0])]);
        heuristic.augment(1, &mut queue);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_subsumption_closure_suggested_once() {
        let mut a = Fault::new(0, "A");
        let b = Fault::new(1, "B");
        a.subsumes(FaultSet::singleton(1));
        let faults = [a, b];

        let mut heuristic = SubsumptionHeuristic::new(&faults);
        let mut queue: VecDeque<FaultSet> = VecDeque::from([set(&[0])]);
        heuristic.augment(1, &mut queue);
        assert_eq!(queue.front(), Some(&set(&[0, 1])));

        let before = queue.len();
        heuristic.augment(1, &mut queue);
        assert_eq!(queue.len(), before);
    }
}
